use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{bail, Context, Result};
use ngstep_engine::InterventionResolution;

/// Asks a yes/no question on the terminal. `assume_yes` answers without asking.
pub(crate) fn confirm(question: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let answer = read_answer(&format!("{question} [y/N] "))?;
    Ok(parse_confirmation(&answer))
}

pub(crate) fn ask_intervention(lines: &[String], question: &str) -> Result<InterventionResolution> {
    for line in lines {
        println!("{line}");
    }
    let answer = read_answer(&format!("{question} [y/n/a] "))?;
    Ok(parse_intervention_answer(&answer))
}

pub(crate) fn parse_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub(crate) fn parse_intervention_answer(answer: &str) -> InterventionResolution {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => InterventionResolution::ApplyUpdates,
        "a" | "abort" => InterventionResolution::Abort,
        _ => InterventionResolution::Continue,
    }
}

fn read_answer(prompt: &str) -> Result<String> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        bail!("cannot ask for confirmation without a terminal; pass --yes to proceed");
    }

    let mut stdout = io::stdout();
    stdout
        .write_all(prompt.as_bytes())
        .context("failed writing prompt")?;
    stdout.flush().context("failed flushing prompt")?;

    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .context("failed reading answer")?;
    Ok(answer)
}

use crate::errors::Result;
use crate::smoke;
use colored::*;

/// Launch the nested daemon, bind it to the client and run the smoke checks
pub fn run() -> Result<()> {
    let (config, session) = super::open_session()?;

    let report = smoke::run(&session, &config)?;
    session.close()?;

    println!(
        "{} Daemon ready after {} attempt{}; smoke checks passed",
        "✓".green().bold(),
        report.readiness_attempts,
        if report.readiness_attempts == 1 { "" } else { "s" }
    );
    Ok(())
}

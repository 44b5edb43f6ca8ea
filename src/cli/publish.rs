use crate::container::ImageRef;
use crate::errors::Result;
use crate::smoke;
use crate::stages::VerificationRunner;
use colored::*;

/// Run the smoke checks, then push the client image they ran against as `reference`
pub fn run(reference: String) -> Result<()> {
    // Parse before starting anything so a typo fails fast.
    let reference = ImageRef::parse(&reference)?;
    let (config, session) = super::open_session()?;

    let report = smoke::run(&session, &config)?;
    // The unbound client is pushed as it was verified.
    let no_commands: &[Vec<String>] = &[];
    let published = VerificationRunner::new(&session).publish(
        &report.client.pipeline("publish"),
        no_commands,
        &reference,
    )?;
    session.close()?;

    println!("{} Published {}", "✓".green().bold(), published.cyan().bold());
    Ok(())
}

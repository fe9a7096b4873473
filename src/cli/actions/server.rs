use crate::cli::actions::Action;
use crate::pordo::{config::Options, new};
use anyhow::{Context, Result};

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server { port, options } => {
            let options = Options::load(&options)
                .with_context(|| format!("Failed to load options from {}", options.display()))?;

            new(port, options).await?;
        }
    }

    Ok(())
}

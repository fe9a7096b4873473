use crate::cli::actions::Action;
use anyhow::Result;
use std::path::PathBuf;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(6532),
        options: matches
            .get_one("options")
            .map(|s: &String| PathBuf::from(s))
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --options"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_server_action() {
        let matches = commands::new().get_matches_from(vec![
            "pordo",
            "--port",
            "9000",
            "--options",
            "/data/options.json",
        ]);
        let action = handler(&matches).unwrap();
        let Action::Server { port, options } = action;
        assert_eq!(port, 9000);
        assert_eq!(options, PathBuf::from("/data/options.json"));
    }
}

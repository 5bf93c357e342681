use std::env;

use anyhow::{anyhow, Result};

/// Which entry action an experiment binary should perform.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunMode {
    /// Hand the evaluator to the search driver.
    Search,
    /// Sample one configuration and evaluate it verbosely.
    Trial,
}

impl RunMode {
    pub fn from_str(value: &str) -> Result<Self> {
        match value {
            "search" => Ok(Self::Search),
            "trial" => Ok(Self::Trial),
            other => Err(anyhow!("invalid mode: {}", other)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Trial => "trial",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunModeArgs {
    mode: RunMode,
    help_requested: bool,
}

impl RunModeArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut mode: Option<RunMode> = None;
        let mut help_requested = false;
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            if arg == "--mode" || arg == "-m" {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("expected value after {}", arg))?;
                mode = Some(RunMode::from_str(&value)?);
            } else if arg == "--help" || arg == "-h" {
                help_requested = true;
            } else if let Some(mode_value) = arg.strip_prefix("--mode=") {
                mode = Some(RunMode::from_str(mode_value)?);
            } else {
                return Err(anyhow!("unexpected argument: {}", arg));
            }
        }

        Ok(Self {
            mode: mode.unwrap_or(RunMode::Search),
            help_requested,
        })
    }

    pub fn help_requested(&self) -> bool {
        self.help_requested
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<RunModeArgs> {
        RunModeArgs::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_to_search() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.mode(), RunMode::Search);
        assert!(!args.help_requested());
    }

    #[test]
    fn parses_all_flag_spellings() {
        assert_eq!(parse(&["--mode", "trial"]).unwrap().mode(), RunMode::Trial);
        assert_eq!(parse(&["-m", "trial"]).unwrap().mode(), RunMode::Trial);
        assert_eq!(parse(&["--mode=search"]).unwrap().mode(), RunMode::Search);
    }

    #[test]
    fn rejects_unknown_mode_and_arguments() {
        assert!(parse(&["--mode", "full"]).is_err());
        assert!(parse(&["--mode"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn help_flag_is_recorded() {
        assert!(parse(&["--help"]).unwrap().help_requested());
        assert!(parse(&["-h"]).unwrap().help_requested());
    }

    #[test]
    fn mode_labels_round_trip() {
        for mode in [RunMode::Search, RunMode::Trial] {
            assert_eq!(RunMode::from_str(mode.label()).unwrap(), mode);
        }
    }
}

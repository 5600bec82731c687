use crate::demo::{run_demo, run_score, DemoArgs, ScoreArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use peopleops::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "peopleops-api",
    about = "Issue, serve and score single-use external performance evaluation links",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk one evaluation link from issuance to verdict against in-memory stores
    Demo(DemoArgs),
    /// Score a list of ratings with the banded and verdict scorers
    Score(ScoreArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Score(args) => run_score(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use peopleops::workflows::evaluations::Rating;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn score_accepts_comma_separated_labels() {
        let cli = Cli::try_parse_from([
            "peopleops-api",
            "score",
            "--answers",
            "Excellent,Muito Bom,very_good,Regular",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Score(args)) => assert_eq!(
                args.answers,
                vec![
                    Rating::Excellent,
                    Rating::VeryGood,
                    Rating::VeryGood,
                    Rating::Regular
                ]
            ),
            other => panic!("expected score command, got {other:?}"),
        }
    }

    #[test]
    fn unknown_rating_label_is_rejected() {
        assert!(Cli::try_parse_from(["peopleops-api", "score", "--answers", "Great"]).is_err());
    }

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["peopleops-api"]).expect("parses");
        assert!(cli.command.is_none());
    }
}

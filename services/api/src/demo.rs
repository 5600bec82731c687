use crate::infra::{build_service, demo_directory};
use clap::Args;
use peopleops::config::EvaluationLinkConfig;
use peopleops::error::AppError;
use peopleops::workflows::evaluations::{
    ClientKey, EvaluationSubmission, EvaluationType, IssueLinkRequest, QuestionSet, Rating,
    ScoringEngine, SessionId, SubjectId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const ANSWER_CYCLE: [Rating; 4] = [
    Rating::Excellent,
    Rating::VeryGood,
    Rating::Good,
    Rating::VeryGood,
];

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Employee id from the demo roster to evaluate
    #[arg(long, default_value = "emp-100")]
    pub(crate) subject: String,
    /// Evaluation type (peer, manager, sponsor; aliases colleague and supervisor)
    #[arg(long, default_value = "peer", value_parser = parse_evaluation_type)]
    pub(crate) evaluation_type: EvaluationType,
    /// Name recorded as the external evaluator
    #[arg(long, default_value = "Marcos Pereira")]
    pub(crate) evaluator: String,
}

#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// Comma separated ratings, e.g. Excellent,Very Good,Good
    #[arg(long, required = true, value_delimiter = ',', value_parser = parse_rating)]
    pub(crate) answers: Vec<Rating>,
}

fn parse_rating(raw: &str) -> Result<Rating, String> {
    Rating::parse(raw).ok_or_else(|| format!("unknown rating '{}'", raw.trim()))
}

fn parse_evaluation_type(raw: &str) -> Result<EvaluationType, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
        .map_err(|_| format!("unknown evaluation type '{}'", raw.trim()))
}

pub(crate) fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let engine = ScoringEngine::new();
    let banded = engine.banded(&args.answers);
    let verdict = engine.score(&args.answers);

    println!("Scored {} answers", banded.answered);
    match banded.average {
        Some(average) => println!(
            "- Band: {} (average {:.2}, total {})",
            banded.band.label(),
            average,
            banded.score
        ),
        None => println!("- Band: {}", banded.band.label()),
    }
    println!(
        "- Verdict: {} (score {}) | {} positive / {} neutral / {} negative",
        verdict.verdict.label(),
        verdict.score,
        verdict.tally.positive,
        verdict.tally.neutral,
        verdict.tally.negative
    );
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        subject,
        evaluation_type,
        evaluator,
    } = args;

    // The scripted evaluator answers instantly.
    let config = EvaluationLinkConfig {
        public_origin: "https://people.example.com".to_string(),
        min_completion: Duration::ZERO,
        ..EvaluationLinkConfig::default()
    };
    let handles = build_service(Arc::new(demo_directory()), &config);
    let service = handles.service.clone();

    println!("External evaluation demo");
    let subjects = service.list_subjects(None)?;
    println!("Evaluable subjects:");
    for summary in &subjects {
        println!("  - {} {}", summary.id.0, summary.name);
    }

    let issued = match service
        .issue_link(IssueLinkRequest {
            subject_id: SubjectId(subject),
            evaluation_type,
            issuer_name: "People Team".to_string(),
        })
        .await
    {
        Ok(issued) => issued,
        Err(err) => {
            println!("  Link not issued: {err}");
            return Ok(());
        }
    };
    println!(
        "\nIssued {} link for {} (expires {})",
        issued.link.evaluation_type,
        issued.link.subject_name,
        issued.link.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!("  {}", issued.url);

    let token = issued.link.token.as_str();
    let client = ClientKey::derive("192.0.2.10", token);
    let session = SessionId("demo-session".to_string());
    let form = match service.open_form(token, &client, &session).await {
        Ok(form) => form,
        Err(err) => {
            println!("  Form unavailable: {}", err.public_message());
            return Ok(());
        }
    };
    println!(
        "Evaluator opened the form: {} questions (version {}), issued by {}",
        form.questions.questions.len(),
        form.questions.version,
        form.link.issuer_name
    );

    let submission = demo_submission(form.questions, evaluator);
    let ratings: Vec<Rating> = submission.answers.values().copied().collect();
    let evaluation_id = match service
        .submit(token, &client, form.form_token.as_str(), &session, submission)
        .await
    {
        Ok(id) => id,
        Err(err) => {
            println!("  Submission rejected: {}", err.public_message());
            return Ok(());
        }
    };

    match service.evaluation(&evaluation_id).await {
        Ok(Some(evaluation)) => {
            println!(
                "\nEvaluation {} -> {} (score {})",
                evaluation.id.0,
                evaluation.verdict.label(),
                evaluation.score
            );
            if evaluation.flagged_for_review {
                println!("  Flagged for review:");
                for signal in &evaluation.review_signals {
                    println!("    - {}", signal.describe());
                }
            }
        }
        Ok(None) => println!("  Evaluation {} not found", evaluation_id.0),
        Err(err) => println!("  Evaluation lookup failed: {err}"),
    }
    let tally = service.score_answers(&ratings).tally;
    println!(
        "  Answers: {} positive / {} neutral / {} negative",
        tally.positive, tally.neutral, tally.negative
    );
    let banded = service.score_inspection(&ratings);
    println!("  Inspection band for the same answers: {}", banded.band.label());

    let replay = service.resolve_link(token, &client).await;
    if let Err(err) = replay {
        println!("  Reopening the link: {} ({err:?})", err.public_message());
    }

    match service
        .eligibility(&issued.link.subject_id, evaluation_type)
        .await
    {
        Ok(eligibility) => match serde_json::to_string(&eligibility) {
            Ok(json) => println!("  Eligibility for another {evaluation_type} link: {json}"),
            Err(err) => println!("  Eligibility unavailable: {err}"),
        },
        Err(err) => println!("  Eligibility unavailable: {err}"),
    }

    println!("\nHistory:");
    for entry in handles.history.entries() {
        println!(
            "  - [{}] {}: {} (by {})",
            entry.category, entry.title, entry.description, entry.actor
        );
    }

    println!("Security log:");
    for event in handles.security_log.events() {
        println!(
            "  - {:<20} {:<8} token={}",
            event.event_type.label(),
            event.severity.label(),
            event.token.as_deref().unwrap_or("-")
        );
    }
    println!("Rate limit buckets tracked: {}", handles.rate_limits.len());

    Ok(())
}

fn demo_submission(questions: &QuestionSet, evaluator_name: String) -> EvaluationSubmission {
    let answers = questions
        .questions
        .iter()
        .zip(ANSWER_CYCLE.iter().cycle())
        .map(|(question, rating)| (question.key.to_string(), *rating))
        .collect();
    let free_text: BTreeMap<String, String> = questions
        .free_text
        .iter()
        .map(|question| {
            (
                question.key.to_string(),
                "Consistently prepares for reviews and follows up on open items.".to_string(),
            )
        })
        .collect();

    EvaluationSubmission {
        evaluator_name,
        answers,
        free_text,
        general_feedback: Some(
            "Reliable partner during the quarter close; would welcome more written updates."
                .to_string(),
        ),
    }
}

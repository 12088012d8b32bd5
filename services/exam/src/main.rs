mod config;

use crate::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;
use viva_core::domain::{Exam, ParsedRubric, Rubric, SessionStatus, StudentSession, new_id};
use viva_core::llm::OpenRouterClient;
use viva_core::orchestrator::Orchestrator;
use viva_core::rubric::parse_rubric;
use viva_core::store::{ExamStore, MemoryStore, RubricStore, SessionStore};

#[derive(Parser)]
struct Cli {
    /// Path to the rubric file (markdown, or pre-parsed JSON with a .json extension)
    rubric: PathBuf,

    /// Name of the student taking the exam
    #[arg(long, default_value = "Student")]
    student: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting exam service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    // --- 4. Initialize API Client and Stores ---
    let llm = Arc::new(OpenRouterClient::new(
        config.api_key.clone(),
        config.base_url.clone(),
        config.model.clone(),
    ));
    let store = Arc::new(MemoryStore::new());

    // --- 5. Load and Parse the Rubric ---
    let rubric_text = std::fs::read_to_string(&args.rubric)
        .with_context(|| format!("Failed to read rubric file {}", args.rubric.display()))?;

    let parsed: ParsedRubric = if args.rubric.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&rubric_text).context("Failed to parse rubric JSON")?
    } else {
        parse_rubric(llm.as_ref(), &rubric_text)
            .await
            .context("Failed to parse rubric with the LLM")?
    };
    if parsed.criteria.is_empty() {
        anyhow::bail!("Rubric parsing produced no criteria; check the rubric file");
    }
    tracing::info!("Parsed rubric with {} criteria.", parsed.criteria.len());

    // --- 6. Seed the Exam and Session ---
    let rubric_id = new_id();
    RubricStore::upsert(
        store.as_ref(),
        Rubric {
            id: rubric_id.clone(),
            title: args.rubric.display().to_string(),
            content: rubric_text,
            parsed_criteria: Some(parsed.clone()),
        },
    )
    .await?;

    let exam_id = new_id();
    ExamStore::create(
        store.as_ref(),
        Exam {
            id: exam_id.clone(),
            rubric_id,
            room_code: new_id()[..6].to_uppercase(),
        },
    )
    .await?;

    let session = StudentSession::new(&exam_id, &args.student, &new_id());
    let session_id = session.id.clone();
    SessionStore::create(store.as_ref(), session).await?;

    let orchestrator = Orchestrator::new(
        llm,
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );

    // --- 7. Run the Exam Loop ---
    let first_question = orchestrator
        .start_student_session(&session_id, &parsed)
        .await
        .context("Failed to generate the opening question")?;

    println!("Oral exam for {}. Type your answer, 'skip' to skip, or 'quit' to end.\n", args.student);
    println!("Examiner: {first_question}\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            SessionStore::set_status(store.as_ref(), &session_id, SessionStatus::Terminated)
                .await?;
            println!("Exam ended early.");
            break;
        }

        let result = if input.eq_ignore_ascii_case("skip") {
            orchestrator.process_skip_request(&session_id).await
        } else {
            orchestrator.process_student_response(&session_id, input).await
        };

        let processed = match result {
            Ok(processed) => processed,
            Err(err) => {
                tracing::error!(error = %err, "failed to process input");
                println!("Something went wrong, please try again.");
                continue;
            }
        };

        if let Some(event) = &processed.struggle_event {
            tracing::info!(
                struggle_type = event.struggle_type.as_str(),
                severity = event.severity.as_str(),
                "struggle recorded"
            );
        }
        if let Some(message) = &processed.teacher_message {
            println!("[{message}]");
        }

        if processed.is_final {
            println!(
                "The exam is complete. Final coverage: {:.0}%.",
                processed.coverage_pct * 100.0
            );
            break;
        }

        println!(
            "\nExaminer (question {}, coverage {:.0}%): {}\n",
            processed.question_number,
            processed.coverage_pct * 100.0,
            processed.next_question
        );
    }

    Ok(())
}

use anyhow::Result;
use colored::*;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use parley_core::models::ON_PREM_MODEL_ID;
use parley_core::{
    detect_sensitive_data, Confidence, Features, FileAttachment, Recommendation, SendOptions,
    SendOutcome, SensitiveDataReport,
};

use crate::{App, SendArgs};

pub fn print_scan(report: &SensitiveDataReport) {
    if !report.is_sensitive {
        println!("{}", report.description.green());
        return;
    }
    let confidence = match report.confidence {
        Confidence::High => report.confidence.to_string().red().bold(),
        Confidence::Medium => report.confidence.to_string().yellow().bold(),
        Confidence::Low => report.confidence.to_string().normal(),
    };
    println!("⚠️  {} ({} confidence)", report.description, confidence);
    if let Some(model) = &report.suggested_model {
        println!("   Consider the on-prem model: {}", model.bold());
    }
}

/// Offers the on-prem model when `content` looks sensitive. Returns the model
/// to use for this message, if it differs from the requested one.
fn confirm_sensitive(content: &str, model: Option<&str>) -> Result<Option<String>> {
    let report = detect_sensitive_data(content);
    let Some(suggested) = report.suggested_model.as_deref() else {
        return Ok(None);
    };
    if model == Some(suggested) {
        return Ok(None);
    }

    print_scan(&report);
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("How should this message be sent?")
        .items(&["Switch to the on-prem model", "Send as is"])
        .default(0)
        .interact()?;
    Ok((choice == 0).then(|| suggested.to_string()))
}

fn pick_alternative(recommendation: &Recommendation) -> Result<Option<String>> {
    println!("\n💡 {}", recommendation.message.yellow());
    if recommendation.alternatives.is_empty() {
        println!("{}", "No other models are available".red());
        return Ok(None);
    }

    let mut items: Vec<String> = recommendation
        .alternatives
        .iter()
        .map(|m| {
            if recommendation.recommended_model.as_deref() == Some(m.id.as_str()) {
                format!("{} ({}) recommended", m.name, m.id)
            } else {
                format!("{} ({})", m.name, m.id)
            }
        })
        .collect();
    items.push("Cancel".to_string());

    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Retry with another model instead of {}?", recommendation.requested_model))
        .items(&items)
        .default(0)
        .interact()?;
    Ok(recommendation.alternatives.get(choice).map(|m| m.id.clone()))
}

async fn upload_all(app: &App, args: &SendArgs) -> Result<Vec<FileAttachment>> {
    let mut attachments = Vec::with_capacity(args.files.len());
    for path in &args.files {
        println!("📎 Uploading {}...", path.display());
        attachments.push(app.sessions.upload_file(path).await?);
    }
    Ok(attachments)
}

/// Sends one message, following recommendations until the user gives up or
/// gets an answer.
pub async fn send(app: &App, content: &str, args: &SendArgs) -> Result<()> {
    let mut model = args.model.clone();
    if let Some(on_prem) = confirm_sensitive(content, model.as_deref())? {
        model = Some(on_prem);
    }
    if model.as_deref() == Some(ON_PREM_MODEL_ID) && app.models.get(ON_PREM_MODEL_ID).await.is_none() {
        println!("{}", "The on-prem model is not configured on this backend".yellow());
    }

    let options = SendOptions {
        model,
        features: Features {
            web_search: args.web_search,
            image_generation: args.image_generation,
            code_interpreter: args.code_interpreter,
        },
        files: upload_all(app, args).await?,
        ..SendOptions::default()
    };

    let mut outcome = app.sessions.send_message(content, None, options.clone()).await?;
    loop {
        match outcome {
            SendOutcome::Answered { message, .. } => {
                println!("\n{}", "Assistant:".bold().green());
                println!("{}", message.content);
                return Ok(());
            }
            SendOutcome::Failed { message, .. } => {
                println!("{}: {}", "Request failed".red(), message.content);
                return Ok(());
            }
            SendOutcome::Recommendation { recommendation, .. } => {
                let Some(next) = pick_alternative(&recommendation)? else {
                    return Ok(());
                };
                println!("🤖 Retrying with {}...", next.bold().magenta());
                outcome = app
                    .sessions
                    .send_message(content, Some(&next), options.clone())
                    .await?;
            }
        }
    }
}

pub async fn interactive(app: &App, session: Option<&str>, args: &SendArgs) -> Result<()> {
    app.sessions.initialize().await?;
    match session {
        Some(raw) => {
            let id = app.resolve_session(raw).await?;
            app.sessions.select_session(&id).await?;
        }
        None => {
            app.sessions.create_new_session().await;
        }
    }

    if let Some(current) = app.sessions.current_session().await {
        println!("\n{} {}", "💬".bold(), current.title.bold().blue());
        println!("{}", "=".repeat(50).dimmed());
        for message in &current.messages {
            println!("{} {}", format!("{}:", message.role.as_str()).bold(), message.content);
        }
    }
    println!("{}", "Type /quit to leave, /new for a new session".dimmed());

    loop {
        let line: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()?;
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                app.sessions.create_new_session().await;
                println!("{}", "Started a new session".dimmed());
            }
            content => send(app, content, args).await?,
        }
    }

    Ok(())
}

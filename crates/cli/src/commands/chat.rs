//! `tides chat`: talk to the concierge from the terminal.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tides_agent::{AgentStreamEvent, ChatRequest, Concierge};
use tides_config::AppConfig;
use tides_core::event::{DomainEvent, EventBus};
use tides_core::locale::Locale;
use tides_core::message::{Message, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

/// How long to wait for the background recorder before exiting.
const RECORD_WAIT: Duration = Duration::from_secs(5);

pub struct ChatArgs {
    pub message: Option<String>,
    pub session: Option<String>,
    pub unit: Option<String>,
    pub language: Option<String>,
    pub verbose: bool,
}

struct Turn<'a> {
    session: Option<SessionId>,
    unit: Option<String>,
    locale: Option<Locale>,
    verbose: bool,
    events: &'a mut broadcast::Receiver<Arc<DomainEvent>>,
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ❌ No API key configured.");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENAI_API_KEY = 'sk-...'");
        eprintln!("    TIDES_API_KEY  = 'sk-...'   (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = tides_providers::build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;
    let store = tides_store::build_from_config(&config.storage).await?;
    let tools = Arc::new(tides_tools::default_registry(store.clone()));
    let event_bus = Arc::new(EventBus::default());
    let mut events = event_bus.subscribe();
    let concierge = Concierge::from_config(&config, provider, store, tools, event_bus);

    let locale = args.language.as_deref().map(Locale::parse);
    let unit = args
        .unit
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    let session = args.session.as_deref().and_then(SessionId::parse);

    if let Some(message) = args.message {
        let mut turn = Turn {
            session,
            unit,
            locale,
            verbose: args.verbose,
            events: &mut events,
        };
        return ask(&concierge, &message, &mut turn).await;
    }

    // Interactive mode keeps one session so follow-up questions have history.
    let session = session.unwrap_or_default();
    println!();
    println!("  Tides Concierge: Interactive Mode");
    println!();
    println!("  Model:     {}", config.default_model);
    println!("  Unit:      {}", unit.as_deref().unwrap_or("(not set)"));
    println!("  Language:  {}", locale.unwrap_or(concierge.default_locale()));
    println!("  Session:   {session}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut turn = Turn {
        session: Some(session),
        unit,
        locale,
        verbose: args.verbose,
        events: &mut events,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("  You > ");
    std::io::stdout().flush()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }
        if !line.is_empty() {
            print!("  Tides > ");
            if let Err(e) = ask(&concierge, line, &mut turn).await {
                eprintln!("  [Error] {e}");
            }
            println!();
        }
        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

/// Run one turn, printing answer text as it streams.
async fn ask(
    concierge: &Concierge,
    text: &str,
    turn: &mut Turn<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = concierge.start(ChatRequest {
        messages: vec![Message::user(text)],
        session_id: turn.session.clone(),
        unit_number: turn.unit.clone(),
        locale: turn.locale,
    })?;

    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                stdout.flush()?;
            }
            AgentStreamEvent::ToolCall { name, input, .. } if turn.verbose => {
                eprintln!("\n  [tool] {name} {input}");
            }
            AgentStreamEvent::ToolResult { name, output, .. } if turn.verbose => {
                eprintln!("  [tool] {name} -> {output}");
            }
            AgentStreamEvent::Done { .. } => println!(),
            AgentStreamEvent::Error { message } => {
                println!();
                return Err(format!("Model error: {message}").into());
            }
            _ => {}
        }
    }

    if turn.session.is_some() {
        wait_for_record(turn.events).await;
    }
    Ok(())
}

/// Give the background recorder a chance to finish before the next turn
/// or process exit.
async fn wait_for_record(events: &mut broadcast::Receiver<Arc<DomainEvent>>) {
    let _ = tokio::time::timeout(RECORD_WAIT, async {
        loop {
            match events.recv().await {
                Ok(event)
                    if matches!(
                        *event,
                        DomainEvent::ExchangeRecorded { .. } | DomainEvent::PersistenceFailed { .. }
                    ) =>
                {
                    return;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
    .await;
}

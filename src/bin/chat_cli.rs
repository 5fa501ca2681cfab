use std::io::{self, Write};
use std::sync::Arc;

use provider_client::CompletionClient;
use provider_client::config::{ClientSettings, apply_env_credentials};
use provider_client::core::types::{
    AgentPersona, AgentSettings, ConnectionState, ConversationTurn, ProviderId, ProviderUpdate,
};
use provider_client::detection::ModelDetector;
use provider_client::health::HealthMonitor;
use provider_client::registry::ProviderRegistry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

struct CliConfig {
    provider: Option<ProviderId>,
    model: Option<String>,
    settings: ClientSettings,
    system_prompt: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("provider_client=info")),
        )
        .init();

    let config = parse_config(std::env::args().skip(1).collect())?;

    let registry = Arc::new(ProviderRegistry::default());
    apply_env_credentials(&registry);
    if let Some(provider) = config.provider {
        select_provider(&registry, provider, config.model.as_deref())?;
    }

    let detector = Arc::new(ModelDetector::with_settings(
        Arc::clone(&registry),
        config.settings.detection_timeout_ms,
        config.settings.detection_throttle(),
    )?);
    let monitor = Arc::new(
        HealthMonitor::new(Arc::clone(&detector)).with_interval(config.settings.health_interval()),
    );
    let client = CompletionClient::builder()
        .with_registry(Arc::clone(&registry))
        .with_settings(config.settings.clone())
        .build()?;

    let cancel = CancellationToken::new();
    let monitor_task = tokio::spawn(Arc::clone(&monitor).run(cancel.clone()));

    if registry.active_id().is_some_and(ProviderId::is_local) {
        detector.detect(true).await;
    }
    eprintln!(
        "chat_cli: provider={}, commands=/exit /quit /clear /detect /status /test [ID] /provider ID /agent DESCRIPTION",
        describe_active(&registry)
    );

    let mut persona = AgentPersona {
        system_prompt: config.system_prompt,
        capabilities: Vec::new(),
        settings: AgentSettings::default(),
    };
    let mut history: Vec<ConversationTurn> = Vec::new();
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }

        let user_text = input.trim();
        if user_text.is_empty() {
            continue;
        }

        if user_text.eq_ignore_ascii_case("/exit") || user_text.eq_ignore_ascii_case("/quit") {
            break;
        }

        if user_text.eq_ignore_ascii_case("/clear") {
            history.clear();
            println!("(history cleared)");
            continue;
        }

        if user_text.eq_ignore_ascii_case("/detect") {
            let models = detector.detect(true).await;
            if models.is_empty() {
                let reason = registry
                    .get(ProviderId::Ollama)
                    .and_then(|config| config.last_error)
                    .unwrap_or_else(|| "no models detected".to_string());
                println!("(no local models: {reason})");
            } else {
                println!("(local models: {})", models.join(", "));
            }
            monitor.request_refresh();
            continue;
        }

        if user_text.eq_ignore_ascii_case("/status") {
            println!("({})", describe_state(&monitor.state()));
            continue;
        }

        if user_text.eq_ignore_ascii_case("/test") || user_text.starts_with("/test ") {
            let report = match user_text.strip_prefix("/test ").map(str::trim) {
                Some(provider) if !provider.is_empty() => match provider.parse::<ProviderId>() {
                    Ok(provider) => client.test_connection_for(provider).await,
                    Err(error) => {
                        println!("({error})");
                        continue;
                    }
                },
                _ => client.test_connection().await,
            };
            match (report.success, report.response, report.error) {
                (true, Some(response), _) => println!("(connection ok: {response})"),
                (_, _, Some(error)) => println!("(connection failed: {error})"),
                _ => println!("(connection test finished without output)"),
            }
            continue;
        }

        if let Some(provider) = user_text.strip_prefix("/provider ") {
            match provider.trim().parse::<ProviderId>() {
                Ok(provider) => {
                    select_provider(&registry, provider, None)?;
                    if provider.is_local() {
                        detector.detect(true).await;
                    }
                    println!("(active provider: {})", describe_active(&registry));
                }
                Err(error) => println!("({error})"),
            }
            continue;
        }

        if let Some(description) = user_text.strip_prefix("/agent ") {
            match client.generate_agent_config(description).await {
                Ok(blueprint) => {
                    println!(
                        "(agent \"{}\" with capabilities: {})",
                        blueprint.name,
                        blueprint.capabilities.join(", ")
                    );
                    persona = blueprint.persona();
                    history.clear();
                }
                Err(error) => println!("{}", error.chat_message()),
            }
            continue;
        }

        let reply = match client
            .generate_agent_response(&persona, &history, user_text)
            .await
        {
            Ok(result) => result.text,
            Err(error) => error.chat_message(),
        };
        println!("{reply}");
        history.push(ConversationTurn::user(user_text));
        history.push(ConversationTurn::agent(reply));
    }

    cancel.cancel();
    let _ = monitor_task.await;
    Ok(())
}

/// Makes `provider` active. Cloud providers with a credential are enabled so
/// the session can chat immediately.
fn select_provider(
    registry: &ProviderRegistry,
    provider: ProviderId,
    model: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    registry.set_active(provider)?;

    let Some(current) = registry.get(provider) else {
        return Ok(());
    };
    let mut update = ProviderUpdate::default();
    if !current.is_local && current.has_credential() {
        update.enabled = Some(true);
    }
    if let Some(model) = model {
        let mut models = current.available_models.clone();
        if !models.iter().any(|known| known == model) {
            models.push(model.to_string());
        }
        update.available_models = Some(models);
        update.selected_model = Some(model.to_string());
    }
    registry.update(provider, update);
    Ok(())
}

fn describe_active(registry: &ProviderRegistry) -> String {
    match registry.active_id().and_then(|provider| registry.get(provider)) {
        Some(config) if config.selected_model.is_empty() => format!("{} (no model)", config.id),
        Some(config) => format!("{} model={}", config.id, config.selected_model),
        None => "none".to_string(),
    }
}

fn describe_state(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Idle => "idle".to_string(),
        ConnectionState::Checking => "checking".to_string(),
        ConnectionState::Connected { provider, model } => {
            format!("connected to {provider} using {model}")
        }
        ConnectionState::Disconnected {
            provider: Some(provider),
            reason,
        } => format!("{provider} disconnected: {reason}"),
        ConnectionState::Disconnected {
            provider: None,
            reason,
        } => format!("disconnected: {reason}"),
    }
}

fn parse_config(args: Vec<String>) -> Result<CliConfig, Box<dyn std::error::Error>> {
    let mut provider = std::env::var("PROVIDER_CLIENT_CLI_PROVIDER")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.parse::<ProviderId>())
        .transpose()?;

    let mut model = std::env::var("PROVIDER_CLIENT_CLI_MODEL")
        .ok()
        .filter(|value| !value.trim().is_empty());

    let mut settings = ClientSettings::default();
    let mut system_prompt = "You are a helpful assistant.".to_string();

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--provider" => {
                let value = args
                    .get(i + 1)
                    .ok_or("missing value for --provider (ollama|openai|anthropic|gemini)")?;
                provider = Some(value.parse::<ProviderId>()?);
                i += 2;
            }
            "--model" => {
                let value = args
                    .get(i + 1)
                    .ok_or("missing value for --model")?
                    .trim()
                    .to_string();
                if value.is_empty() {
                    return Err("--model must be non-empty".into());
                }
                model = Some(value);
                i += 2;
            }
            "--settings" => {
                let path = args.get(i + 1).ok_or("missing value for --settings")?;
                let json = std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read settings file {path}: {e}"))?;
                settings = ClientSettings::from_json_str(&json)?;
                i += 2;
            }
            "--system" => {
                system_prompt = args
                    .get(i + 1)
                    .ok_or("missing value for --system")?
                    .to_string();
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    if model.is_some() && provider.is_none() {
        return Err("--model requires --provider".into());
    }

    Ok(CliConfig {
        provider,
        model,
        settings,
        system_prompt,
    })
}

fn print_help() {
    println!(
        "Usage:\n  cargo run --bin chat_cli -- [--provider ollama|openai|anthropic|gemini] [--model MODEL] [--settings FILE.json] [--system PROMPT]\n\nEnv:\n  OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY\n  OLLAMA_HOST\n  PROVIDER_CLIENT_CLI_PROVIDER\n  PROVIDER_CLIENT_CLI_MODEL\n  RUST_LOG\n\nCommands:\n  /clear              clear conversation history\n  /detect             re-detect local models\n  /status             show connection status\n  /test [ID]          send a connection test prompt (active provider by default)\n  /provider ID        switch the active provider\n  /agent DESCRIPTION  generate an agent persona and chat as it\n  /exit               quit\n  /quit               quit"
    );
}

//! Command-line front-end for the dispatch engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use dispatch_backends::OllamaTransport;
use dispatch_core::config::DispatcherConfig;
use dispatch_core::event::DispatchEvent;
use dispatch_core::model::{BackendInstance, RequestSpec, ScenarioTag};
use dispatch_engine::{Dispatcher, SelectionStrategy};

/// Control the dispatch engine: submit prompts, watch queue/backend status,
/// and manage the registered instance pool.
#[derive(Parser, Debug)]
#[command(name = "dispatchctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a single prompt and print the completed response.
    Submit {
        /// The prompt text.
        prompt: String,
        /// Backend instance address (repeatable to register a pool).
        #[arg(long, default_value = "http://localhost:11434")]
        backend: Vec<String>,
        /// Force a specific model instead of scenario-based selection.
        #[arg(short, long)]
        model: Option<String>,
        /// Stream chunks to stdout as they arrive.
        #[arg(long)]
        stream: bool,
        /// Scenario tag, biases model selection.
        #[arg(long, default_value = "general-chat")]
        scenario: String,
    },
    /// Interactive REPL: each line submitted as a streaming request.
    Chat {
        #[arg(long, default_value = "http://localhost:11434")]
        backend: Vec<String>,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Refresh and print the model catalog across registered backends.
    ListModels {
        #[arg(long, default_value = "http://localhost:11434")]
        backend: Vec<String>,
    },
    /// Print queue and backend status once.
    Status {
        #[arg(long, default_value = "http://localhost:11434")]
        backend: Vec<String>,
    },
}

fn parse_scenario(raw: &str) -> ScenarioTag {
    match raw {
        "code-gen" => ScenarioTag::CodeGen,
        "tech-support" => ScenarioTag::TechSupport,
        "narrative" => ScenarioTag::Narrative,
        "data-analysis" => ScenarioTag::DataAnalysis,
        "translation" => ScenarioTag::Translation,
        "summarization" => ScenarioTag::Summarization,
        "qa" => ScenarioTag::Qa,
        "creative-writing" => ScenarioTag::CreativeWriting,
        "debugging" => ScenarioTag::Debugging,
        _ => ScenarioTag::GeneralChat,
    }
}

async fn build_dispatcher(backends: &[String]) -> Result<Arc<Dispatcher>> {
    let transport = Arc::new(OllamaTransport::new());
    let dispatcher = Dispatcher::new(DispatcherConfig::default(), transport);

    for (i, address) in backends.iter().enumerate() {
        let id = format!("backend-{i}");
        dispatcher
            .register_instance(BackendInstance::new(&id, &id, address))
            .await
            .map_err(|e| anyhow::anyhow!("failed to register {address}: {e}"))?;
    }

    dispatcher.refresh_models().await;
    dispatcher.set_selection_strategy(SelectionStrategy::LeastConnections).await;
    Ok(dispatcher)
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n=== PANIC ===");
        if let Some(location) = panic_info.location() {
            eprintln!("Location: {}:{}:{}", location.file(), location.line(), location.column());
        } else {
            eprintln!("Location: <unknown>");
        }
        eprintln!("Message: {}", panic_info);
        eprintln!("==============\n");
    }));

    let args = Args::parse();

    let log_level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("dispatch={log_level}")));

    let json_logging = std::env::var("DISPATCH_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).with_target(true).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .init();
    }

    match args.command {
        Command::Submit { prompt, backend, model, stream, scenario } => {
            run_submit(&prompt, &backend, model, stream, &scenario).await
        }
        Command::Chat { backend, model } => run_chat(&backend, model).await,
        Command::ListModels { backend } => run_list_models(&backend).await,
        Command::Status { backend } => run_status(&backend).await,
    }
}

async fn run_submit(prompt: &str, backend: &[String], model: Option<String>, stream: bool, scenario: &str) -> Result<()> {
    let dispatcher = build_dispatcher(backend).await?;

    let mut spec = RequestSpec::new(prompt).with_stream(stream).with_scenario(parse_scenario(scenario));
    if let Some(model) = model {
        spec = spec.with_model_override(model);
    }

    let mut events = dispatcher.events().filter().custom(|_| true);
    let id = dispatcher.submit(spec).await?;

    loop {
        let Some((event, _)) = events.recv().await else { break };
        if event.request_id() != Some(id.as_str()) {
            continue;
        }
        match event {
            DispatchEvent::Chunk { text, .. } => {
                print!("{text}");
                use std::io::Write;
                std::io::stdout().flush()?;
            }
            DispatchEvent::RequestCompleted { content, response_time_ms, .. } => {
                if !stream {
                    println!("{content}");
                }
                eprintln!("\n[completed in {response_time_ms:.0}ms]");
                break;
            }
            DispatchEvent::RequestFailed { error, .. } => {
                eprintln!("error: {error}");
                break;
            }
            DispatchEvent::RequestCancelled { .. } => {
                eprintln!("cancelled");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

async fn run_chat(backend: &[String], model: Option<String>) -> Result<()> {
    println!("dispatch-cli chat -- type 'quit' to exit\n");
    let dispatcher = build_dispatcher(backend).await?;
    dispatcher.spawn_background();

    let stdin = std::io::stdin();
    let mut input = String::new();

    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush()?;

        input.clear();
        stdin.read_line(&mut input)?;
        let line = input.trim();

        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let mut spec = RequestSpec::new(line).with_stream(true);
        if let Some(model) = model.clone() {
            spec = spec.with_model_override(model);
        }

        let mut events = dispatcher.events().filter().custom(|_| true);
        let id = dispatcher.submit(spec).await?;

        loop {
            let Some((event, _)) = events.recv().await else { break };
            if event.request_id() != Some(id.as_str()) {
                continue;
            }
            match event {
                DispatchEvent::Chunk { text, .. } => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                DispatchEvent::RequestCompleted { .. } => {
                    println!();
                    break;
                }
                DispatchEvent::RequestFailed { error, .. } => {
                    eprintln!("\nerror: {error}");
                    break;
                }
                _ => {}
            }
        }
    }

    println!("goodbye");
    Ok(())
}

async fn run_list_models(backend: &[String]) -> Result<()> {
    let dispatcher = build_dispatcher(backend).await?;
    let models = dispatcher.registry().list_models().await;

    if models.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    println!("Available models:");
    for model in models {
        println!("  {} ({})", model.name, if model.available { "available" } else { "unavailable" });
    }

    Ok(())
}

async fn run_status(backend: &[String]) -> Result<()> {
    let dispatcher = build_dispatcher(backend).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = dispatcher.queue_status().await;
    let stats = dispatcher.statistics().await;

    println!("Queue: size={} inflight={}", status.size, status.inflight);
    println!(
        "Instances: total={} healthy={} active_connections={}",
        stats.total_instances, stats.healthy_instances, stats.active_connections
    );
    println!(
        "Requests: total={} succeeded={} failed={} avg_response_ms={:.1}",
        stats.total_requests, stats.successful_requests, stats.failed_requests, stats.average_response_time_ms
    );

    for (strategy, count) in status.selection_counters {
        println!("  counter[{strategy}] = {count}");
    }

    Ok(())
}

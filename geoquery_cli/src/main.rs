use geoquery_core::cache::{ArtifactStorage, FsArtifactStore};
use geoquery_core::highlight::SelectionChange;
use geoquery_core::inference::LoadProgress;
use geoquery_core::models::{detect_hardware, recommend, CacheState};
use geoquery_core::{
    AppConfig, DatasetLoader, HeadlessMap, HighlightMap, LocalServerBackend, ModelManager,
    QueryPipeline, TranslationMode,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type Pipeline = QueryPipeline<HeadlessMap>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("GeoQuery - ask questions about the countries of the world");
    println!("Initializing...\n");

    let config = AppConfig::from_env()?;
    let mode = config.translation_mode();

    let dataset = DatasetLoader::new().load(&config.data_path).await?;

    let storage: Arc<dyn ArtifactStorage> = match FsArtifactStore::new(&config.cache_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Artifact cache disabled: {}", e);
            Arc::new(FsArtifactStore::disabled())
        }
    };
    let backend = Arc::new(LocalServerBackend::new(&config.llm_base_url, storage.clone())?);
    let models = Arc::new(
        ModelManager::new(config.model_catalog()?, backend, storage).with_progress_listener(
            Arc::new(|p: LoadProgress| info!("Loading model: {:.0}% {}", p.progress * 100.0, p.text)),
        ),
    );

    let mut map = HighlightMap::new();
    map.attach(HeadlessMap::from_codes(
        dataset.records().iter().map(|r| r.iso_a3.as_str()),
    ));
    let mut pipeline = QueryPipeline::new(dataset, models.clone(), map, config.query_cache_size);

    let initial_model = config
        .initial_model
        .clone()
        .unwrap_or_else(|| recommend(&detect_hardware()).model_id);
    spawn_activation(models, initial_model);

    println!("Ready. Commands:");
    println!("  ASK <question>   translate a question and highlight the answer");
    println!("  SQL <select>     run a SELECT against the countries table");
    println!("  SELECT <code>    toggle the info panel for a country");
    println!("  FOCUS <code>     zoom to a country");
    println!("  RESET            clear highlights and selection");
    println!("  MODELS           list models and their cache state");
    println!("  USE <model>      switch the active model");
    println!("  EVICT <model>    delete a model's cached files (EVICT ALL for every model)");
    println!("  HARDWARE         show the detected hardware and recommended model");
    println!("  EXIT\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("geoquery> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((command, rest)) => (command.to_uppercase(), rest.trim()),
            None => (input.to_uppercase(), ""),
        };

        match command.as_str() {
            "EXIT" | "QUIT" => {
                println!("Goodbye!");
                break;
            }
            "ASK" => ask(&mut pipeline, rest, mode).await,
            "SQL" => match pipeline.run_sql(rest) {
                Ok(panel) => println!("{}\n", panel),
                Err(e) => eprintln!("{}\n", e.user_message()),
            },
            "SELECT" if !rest.to_uppercase().contains("FROM") => select(&mut pipeline, rest),
            "FOCUS" => {
                if !pipeline.focus_region(&rest.to_uppercase()) {
                    eprintln!("No region found for {}", rest);
                }
            }
            "RESET" => {
                pipeline.reset();
                println!("Map reset.");
            }
            "MODELS" => list_models(&pipeline).await,
            "USE" => match pipeline.models().activate(rest).await {
                Ok(()) => println!("Model ready: {}", rest),
                Err(e) => eprintln!("{}", e),
            },
            "EVICT" => evict(&pipeline, rest).await,
            "HARDWARE" => {
                let hardware = detect_hardware();
                let recommendation = recommend(&hardware);
                println!("{}", hardware);
                println!(
                    "Recommended: {} ({} confidence) - {}",
                    recommendation.model_id, recommendation.confidence, recommendation.reason
                );
            }
            // Bare SELECT statements run as SQL.
            _ if command == "SELECT" => match pipeline.run_sql(input) {
                Ok(panel) => println!("{}\n", panel),
                Err(e) => eprintln!("{}\n", e.user_message()),
            },
            _ => ask(&mut pipeline, input, mode).await,
        }
    }

    Ok(())
}

fn spawn_activation(models: Arc<ModelManager>, model_id: String) {
    tokio::spawn(async move {
        match models.activate(&model_id).await {
            Ok(()) => info!("Model ready: {}", model_id),
            Err(e) => warn!("{}", e),
        }
    });
}

async fn ask(pipeline: &mut Pipeline, question: &str, mode: TranslationMode) {
    println!("Translating: '{}'", question);
    match pipeline.ask(question, mode).await {
        Ok(panel) => println!("{}\n", panel),
        Err(e) => eprintln!("{}\n", e.user_message()),
    }
}

fn select(pipeline: &mut Pipeline, code: &str) {
    match pipeline.select_region(&code.to_uppercase()) {
        SelectionChange::Selected(code) => {
            if let Some(record) = pipeline.map().info_panel() {
                println!("{} ({})", record.name, code);
                for (label, value) in [
                    ("Capital", &record.capital),
                    ("Region", &record.region),
                    ("Languages", &record.languages),
                    ("Currencies", &record.currencies),
                ] {
                    if let Some(value) = value {
                        println!("  {}: {}", label, value);
                    }
                }
                if let Some(population) = record.population {
                    println!("  Population: {}", population);
                }
            }
        }
        SelectionChange::Deselected(code) => println!("Deselected {}", code),
        SelectionChange::Ignored => eprintln!("No region found for {}", code),
    }
}

async fn list_models(pipeline: &Pipeline) {
    for status in pipeline.models().list_models().await {
        let state = match status.state {
            CacheState::Cached => "cached",
            CacheState::Downloading => "downloading",
            CacheState::NotCached => "not cached",
        };
        println!(
            "{} {} ({} MB, {}) - {}",
            if status.active { "*" } else { " " },
            status.config.model_id,
            status.config.size_mb,
            state,
            status.config.description
        );
    }
}

async fn evict(pipeline: &Pipeline, target: &str) {
    let models = pipeline.models();
    if target.eq_ignore_ascii_case("ALL") {
        let summary = models.evict_all().await;
        println!(
            "Evicted {} model(s), {} failed",
            summary.succeeded, summary.failed
        );
        return;
    }

    match models.evict(target).await {
        Ok(true) => println!("Evicted {}", target),
        Ok(false) => eprintln!("Could not evict {}", target),
        Err(e) => eprintln!("{}", e),
    }
}

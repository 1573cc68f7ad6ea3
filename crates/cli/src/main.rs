use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use rec_engine::{Engine, MemoryProvider};
use rec_types::{EngineConfig, Interaction, InteractionKind, Item, ItemId, Mode, Request};

/// recsim - recommendation engine demo over a synthetic interaction log
#[derive(Parser)]
#[command(name = "recsim")]
#[command(about = "Train the hybrid recommender on synthetic data and serve one request per mode", long_about = None)]
struct Cli {
    /// Number of synthetic users
    #[arg(long, default_value = "200")]
    users: u64,

    /// Number of catalog items
    #[arg(long, default_value = "500")]
    items: u64,

    /// Number of interactions to simulate
    #[arg(long, default_value = "5000")]
    interactions: usize,

    /// Seed for both the simulation and the randomized trainers
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Results per request (0 = mode default)
    #[arg(long, default_value = "0")]
    k: usize,
}

const GENRES: &[&str] = &[
    "action", "comedy", "drama", "horror", "romance", "scifi", "thriller", "documentary",
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        users = cli.users,
        items = cli.items,
        seed = cli.seed,
        "starting simulation"
    );

    println!(
        "Simulating {} interactions across {} users and {} items (seed {})...",
        cli.interactions, cli.users, cli.items, cli.seed
    );
    let provider = Arc::new(MemoryProvider::new());
    let catalog = synth_catalog(&cli);
    provider.push_items(catalog.clone()).await;
    provider.push_interactions(synth_log(&cli)).await;

    let mut config = EngineConfig::default();
    config.seed = cli.seed;
    config.training.min_interactions = 1;
    let engine = Engine::new(provider, config).context("failed to build engine")?;

    let start = Instant::now();
    let version = engine
        .run_training()
        .await
        .context("training run failed")?;
    let status = engine.status();
    println!(
        "{} Trained model v{} in {:?} ({} interactions, {} items, {} users)",
        "✓".green(),
        version,
        start.elapsed(),
        status.interaction_count,
        status.item_count,
        status.user_count
    );

    // Seed item for Similar/Next: the most popular item in the snapshot.
    let snapshot = engine.snapshot();
    let current_item = snapshot
        .item_popularity
        .iter()
        .max_by(|a, b| {
            a.1.partial_cmp(b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(a.0))
        })
        .map(|(&id, _)| id)
        .unwrap_or(1);
    let sample_user = 1;

    for mode in [Mode::Personalized, Mode::Similar, Mode::Explore, Mode::Next] {
        let request = Request {
            user_id: sample_user,
            k: cli.k,
            mode,
            current_item_id: mode.requires_current_item().then_some(current_item),
            exclude: Vec::new(),
            deadline_ms: None,
            request_id: Some(format!("demo-{}", mode.as_str())),
        };
        let response = engine
            .recommend(request)
            .await
            .with_context(|| format!("{} request failed", mode.as_str()))?;
        print_response(mode, current_item, &response, &catalog);
    }

    let metrics = engine.metrics();
    println!(
        "\n{} {} requests served, {} errors, model v{}",
        "✓".green(),
        metrics.requests,
        metrics.errors,
        metrics.model_version
    );

    Ok(())
}

/// Item catalog with genre mixes and release years.
fn synth_catalog(cli: &Cli) -> Vec<Item> {
    let mut rng = StdRng::seed_from_u64(cli.seed);
    (1..=cli.items)
        .map(|id| {
            let mut genres: Vec<String> = Vec::new();
            for _ in 0..rng.random_range(1..=3) {
                let genre = GENRES[rng.random_range(0..GENRES.len())].to_string();
                if !genres.contains(&genre) {
                    genres.push(genre);
                }
            }
            Item {
                id,
                title: format!("Title #{id}"),
                media_type: "movie".into(),
                genres,
                people: vec![format!("person-{}", rng.random_range(0..50))],
                year: Some(rng.random_range(1960..=2024)),
                popularity_decay_score: rng.random::<f64>(),
                ..Item::default()
            }
        })
        .collect()
}

/// Session-shaped interaction log with a popularity skew: low item ids
/// are watched far more than high ones, and each session strings 2-4
/// plays together so the sequential models have something to learn.
fn synth_log(cli: &Cli) -> Vec<Interaction> {
    let mut rng = StdRng::seed_from_u64(cli.seed.wrapping_add(1));
    let mut log = Vec::with_capacity(cli.interactions);
    let horizon: i64 = 90 * 24 * 3600;

    while log.len() < cli.interactions {
        let user_id = rng.random_range(1..=cli.users);
        let session_start = rng.random_range(0..horizon);
        let session_len = rng.random_range(2..=4usize);
        // Squaring the uniform draw skews toward popular (low) ids.
        let mut item_id = skewed_item(&mut rng, cli.items);
        for step in 0..session_len {
            if log.len() >= cli.interactions {
                break;
            }
            let percent: u8 = rng.random_range(0..=100);
            log.push(Interaction {
                user_id,
                item_id,
                timestamp: session_start + (step as i64) * 600,
                weight: InteractionKind::classify(percent).confidence(),
                session_id: None,
            });
            // Sequential habit: often the next item id, sometimes a jump.
            item_id = if rng.random::<f64>() < 0.7 {
                (item_id % cli.items) + 1
            } else {
                skewed_item(&mut rng, cli.items)
            };
        }
    }
    log
}

fn skewed_item(rng: &mut StdRng, items: u64) -> ItemId {
    let draw: f64 = rng.random();
    ((draw * draw * items as f64) as u64).min(items - 1) + 1
}

fn print_response(
    mode: Mode,
    current_item: ItemId,
    response: &rec_types::Response,
    catalog: &[Item],
) {
    let header = match mode {
        Mode::Similar | Mode::Next => {
            format!("{} (item {})", mode.as_str(), current_item)
        }
        _ => mode.as_str().to_string(),
    };
    println!("\n{}", header.bold().blue());
    println!(
        "  v{} | {} ms | invoked: {}{}",
        response.metadata.model_version,
        response.metadata.latency_ms,
        response.metadata.algorithms_invoked.join(", "),
        if response.metadata.partial {
            " (partial)".yellow().to_string()
        } else {
            String::new()
        }
    );
    for (rank, item) in response.items.iter().enumerate() {
        let title = catalog
            .iter()
            .find(|c| c.id == item.item_id)
            .map(|c| c.title.as_str())
            .unwrap_or("<unknown>");
        println!(
            "{}. {} - score {:.3} via {}",
            (rank + 1).to_string().green(),
            title,
            item.score,
            item.source
        );
    }
}

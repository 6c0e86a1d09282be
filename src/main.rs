use anyhow::Context;
use clap::{Parser, Subcommand};
use neighbourhood_bounds::{config, data, features, pipeline, render, server};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render neighbourhood boundaries over the basemap to a PNG
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Max z-score (standard deviations from the neighbourhood mean)
        #[arg(short = 'z', long)]
        max_z_score: Option<f64>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Print per-neighbourhood summaries as JSON
    Summary {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short = 'z', long)]
        max_z_score: Option<f64>,
    },
    /// Write the encoded land value training matrix to CSV
    Features {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Serve the boundary API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Render { config, max_z_score, output } => {
            info!("Rendering with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            // 1. Load data and basemap once
            let dataset = data::load_dataset(&app_config)?;
            let basemap = render::Basemap::load(&app_config.render.basemap, app_config.basemap_extent())?;
            let options = render::RenderOptions::from_config(&app_config)?;

            // 2. Filter, aggregate, hull, compose
            let threshold = max_z_score.unwrap_or(app_config.filter.max_z_score);
            let result = pipeline::run_pipeline(&dataset, threshold, &basemap, &options)?;

            // 3. Rasterize
            let png = result.render_png()?;
            let path = output.clone().unwrap_or_else(|| app_config.output.png.clone());
            fs::write(&path, png).with_context(|| format!("Failed to write {:?}", path))?;

            info!(
                "Wrote {} boundaries ({} records retained) to {:?}",
                result.hulls.len(),
                result.retained_count(),
                path
            );
        }
        Commands::Summary { config, max_z_score } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let dataset = data::load_dataset(&app_config)?;

            let threshold = max_z_score.unwrap_or(app_config.filter.max_z_score);
            let (_, summaries, _) = pipeline::compute_boundaries(&dataset, threshold)?;

            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Commands::Features { config, output } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let dataset = data::load_dataset(&app_config)?;

            let rows = features::training_rows(&dataset.records);
            let schema = features::FeatureSchema::fit(&rows);

            let path = output.clone().unwrap_or_else(|| app_config.output.features.clone());
            let file = fs::File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
            features::write_training_matrix(&schema, &rows, file)?;

            info!(
                "Wrote {} training rows x {} features to {:?}",
                rows.len(),
                schema.columns().len(),
                path
            );
        }
        Commands::Serve { config } => {
            info!("Serving with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            let dataset = data::load_dataset(&app_config)?;
            let basemap = render::Basemap::load(&app_config.render.basemap, app_config.basemap_extent())?;

            server::start_server(app_config, dataset, basemap).await?;
        }
    }

    Ok(())
}

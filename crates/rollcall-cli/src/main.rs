use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{Identity, TokenCodec};
use rollcalld::service::Registration;
use rollcalld::{build_service, Config};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall identity verification CLI")]
struct Cli {
    /// SQLite database path (overrides ROLLCALL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Match distance threshold (overrides ROLLCALL_MATCH_THRESHOLD)
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person and print their QR payload
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        roll_no: String,
        /// File holding the face descriptor as a JSON array (`-` for stdin)
        #[arg(long)]
        vector: PathBuf,
    },
    /// Match a face descriptor against registered faces
    Match {
        /// File holding the descriptor as a JSON array, or `null` for no face (`-` for stdin)
        #[arg(long)]
        vector: PathBuf,
        /// Email recorded in the scan log
        #[arg(long)]
        scanner: Option<String>,
    },
    /// Encode a lookup token into a QR payload
    Encode { token: String },
    /// Decode a QR payload back into its lookup token
    Decode { payload: String },
    /// Look up the person a QR payload belongs to
    Lookup {
        payload: String,
        /// Email recorded in the scan log
        #[arg(long)]
        scanner: Option<String>,
    },
    /// Show recent scans (admin email required)
    Logs {
        #[arg(long = "as")]
        requester: String,
    },
    /// Show store status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(threshold) = cli.threshold {
        anyhow::ensure!(
            threshold.is_finite() && threshold > 0.0,
            "threshold must be a positive number, got {threshold}"
        );
        config.match_threshold = threshold;
    }

    match cli.command {
        Commands::Encode { token } => {
            let codec = TokenCodec::new(&config.secret_key)?;
            println!("{}", codec.encode(&token)?);
        }
        Commands::Decode { payload } => {
            let codec = TokenCodec::new(&config.secret_key)?;
            let token = codec
                .decode(&payload)
                .map_err(|_| anyhow::anyhow!("Invalid QR code"))?;
            println!("{token}");
        }
        Commands::Register {
            name,
            email,
            roll_no,
            vector,
        } => {
            let face_vector = read_vector(&vector)?
                .context("no face descriptor in input; capture a face first")?;
            let service = build_service(&config).await?;
            let registered = service
                .register(Registration {
                    identity: Identity {
                        name,
                        email,
                        roll_no,
                    },
                    face_vector,
                })
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&registered)?);
            } else {
                println!("Registered {}", registered.id);
                println!("QR payload: {}", registered.payload);
            }
        }
        Commands::Match { vector, scanner } => {
            let descriptor = read_vector(&vector)?;
            let service = build_service(&config).await?;
            let found = service.scan_face(scanner.as_deref(), descriptor).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            } else {
                print_identity(&found.user);
                println!("Distance: {:.4}", found.distance);
            }
        }
        Commands::Lookup { payload, scanner } => {
            let service = build_service(&config).await?;
            let user = service.lookup_qr(scanner.as_deref(), &payload).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "user": user }))?);
            } else {
                print_identity(&user);
            }
        }
        Commands::Logs { requester } => {
            let service = build_service(&config).await?;
            let logs = service.recent_logs(Some(requester.as_str())).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&logs)?);
            } else if logs.is_empty() {
                println!("No logs found.");
            } else {
                for (i, log) in logs.iter().enumerate() {
                    println!(
                        "{:>3}  {}  {:<4}  {:<24}  {:<28}  {}",
                        i + 1,
                        log.created_at,
                        log.scan_type,
                        log.matched_name.as_deref().unwrap_or("-"),
                        log.matched_email.as_deref().unwrap_or("-"),
                        log.scanner_email,
                    );
                }
            }
        }
        Commands::Status => {
            let service = build_service(&config).await?;
            let status = service.status().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("rollcall {}", status.version);
                println!("Database:   {}", config.db_path.display());
                println!("Registered: {}", status.registered);
                println!("Threshold:  {}", status.match_threshold);
            }
        }
    }

    Ok(())
}

fn print_identity(user: &Identity) {
    println!("Name:    {}", user.name);
    println!("Email:   {}", user.email);
    println!("Roll No: {}", user.roll_no);
}

/// Read a descriptor file; `-` reads stdin.
fn read_vector(path: &Path) -> Result<Option<Vec<f32>>> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    parse_vector(&text)
}

/// A JSON array of numbers, or `null` when the extractor found no face.
fn parse_vector(text: &str) -> Result<Option<Vec<f32>>> {
    serde_json::from_str(text).context("descriptor must be a JSON array of numbers or null")
}

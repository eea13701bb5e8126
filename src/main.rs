use std::fmt::Write;
use std::path::PathBuf;

use anyhow::anyhow;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudsleuth::config::AppConfig;
use cloudsleuth::report::{render_files, render_matches};
use cloudsleuth::scan::PlainTextExtractor;
use cloudsleuth::search::FindQuery;
use cloudsleuth::{FileService, ServiceRegistry};

const DEFAULT_CONFIG: &str = "cloud.json";

const USAGE: &str = "\
Usage: cloudsleuth -s <service> [options]

Options:
  -s, --service <type>   File service type to use (see below)
  -c, --config <path>    Configuration file [default: cloud.json]
  -n, --name <name>      Find files by name
      --md5 <digest>     Find files by MD5 digest
      --sha1 <digest>    Find files by SHA1 digest
      --first            Stop at the first match
      --get <dir>        Download the matches into <dir>
  -h, --help             Show this help and the configuration keys of every service
      --version          Show version information

Content scanning runs whenever the configuration has a `regex` section.";

/// Command line arguments / 命令行参数
#[derive(Debug, Default, PartialEq)]
struct Args {
    service: Option<String>,
    config: PathBuf,
    name: Option<String>,
    md5: Option<String>,
    sha1: Option<String>,
    first: bool,
    get: Option<PathBuf>,
    help: bool,
    version: bool,
}

impl Args {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut parsed = Args {
            config: PathBuf::from(DEFAULT_CONFIG),
            ..Default::default()
        };
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let flag = arg.as_str();
            let mut value = || args.next().ok_or_else(|| format!("{} expects a value", flag));
            match flag {
                "-s" | "--service" => parsed.service = Some(value()?),
                "-c" | "--config" => parsed.config = PathBuf::from(value()?),
                "-n" | "--name" => parsed.name = Some(value()?),
                "--md5" => parsed.md5 = Some(value()?),
                "--sha1" => parsed.sha1 = Some(value()?),
                "--get" => parsed.get = Some(PathBuf::from(value()?)),
                "--first" => parsed.first = true,
                "-h" | "--help" => parsed.help = true,
                "--version" => parsed.version = true,
                other => return Err(format!("unknown argument: {}", other)),
            }
        }

        if parsed.service.is_none() && !parsed.help && !parsed.version {
            return Err("missing -s <service>".to_string());
        }
        Ok(parsed)
    }

    fn query(&self) -> Option<FindQuery> {
        if self.name.is_none() && self.md5.is_none() && self.sha1.is_none() {
            return None;
        }
        Some(FindQuery {
            name: self.name.clone(),
            md5: self.md5.clone(),
            sha1: self.sha1.clone(),
            first_only: self.first,
        })
    }
}

/// Usage plus every registered service and its configuration keys
fn help(registry: &ServiceRegistry) -> String {
    let mut out = format!("{}\n\nServices:\n", USAGE);
    for service_type in registry.known_types() {
        let _ = writeln!(out, "  [{}]", service_type);
        let Some(factory) = registry.factory(&service_type) else {
            continue;
        };
        for item in factory.config_items() {
            let _ = write!(out, "    {:<20} {:<8}", item.name, item.item_type);
            if item.required {
                let _ = write!(out, " required");
            }
            if let Some(default) = &item.default {
                let _ = write!(out, " (default: {})", default);
            }
            if let Some(help) = &item.help {
                let _ = write!(out, "  {}", help);
            }
            out.push('\n');
        }
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudsleuth=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let registry = ServiceRegistry::with_builtin();
    if args.help {
        print!("{}", help(&registry));
        return Ok(());
    }
    if args.version {
        println!("cloudsleuth {} (built {})", env!("CARGO_PKG_VERSION"), env!("BUILD_TIME"));
        return Ok(());
    }
    let service_type = args.service.clone().ok_or_else(|| anyhow!("missing -s <service>"))?;

    // Load configuration / 加载配置
    let config = AppConfig::load(&args.config)?;
    let patterns = config.patterns()?;
    let scanner = config.scanner()?;
    let section = config.service_section(&service_type)?;

    // Construction errors are fatal / 创建失败直接退出
    let service = registry.create_service(&service_type, section).await?;

    if let Some(query) = args.query() {
        match &args.get {
            Some(dir) => match service.get_file(&query, dir).await {
                Ok(paths) => {
                    for path in &paths {
                        println!("{}", path.display());
                    }
                    println!(
                        "{}: {} file(s) downloaded to {}",
                        service.service_type(),
                        paths.len(),
                        dir.display()
                    );
                }
                Err(e) => {
                    tracing::error!("Fetching files from {} failed: {}", service.service_type(), e)
                }
            },
            None => match service.find_file(&query).await {
                Ok(files) => println!("{}", render_files(service.service_type(), &files)),
                Err(e) => tracing::error!("Search in {} failed: {}", service.service_type(), e),
            },
        }
    }

    match patterns {
        Some(patterns) => {
            tracing::info!(
                "Scanning {} with {} pattern(s), temp dir {:?}",
                service.service_type(),
                patterns.len(),
                scanner.temp_dir
            );
            let extractor = PlainTextExtractor::new(scanner.max_file_size);
            match service.scan_with(&scanner.temp_dir, &patterns, &extractor).await {
                Ok(matches) => println!("{}", render_matches(service.service_type(), &matches)),
                Err(e) => tracing::error!("Scanning {} failed: {}", service.service_type(), e),
            }
        }
        None => tracing::info!("No regex section configured, content scan skipped"),
    }

    Ok(())
}

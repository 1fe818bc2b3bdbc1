//! quilt CLI - build, inspect and share data packages

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quilt::build::{build_from_path, generate_build_file, BuildOptions};
use quilt::ops::{
    inspect, log, ls, prune, rm, tag_add, tag_list, tag_remove, version_add, version_list,
};
use quilt::transfer::{install, install_requirements, push, InstallOptions, PushOptions, RegistryClient};
use quilt::{Config, Error, Hash, PackageRef, Selector, Store};

#[derive(Parser)]
#[command(name = "quilt")]
#[command(about = "content-addressed data packages")]
#[command(version)]
struct Cli {
    /// package store path
    #[arg(
        short,
        long,
        env = "QUILT_PRIMARY_PACKAGE_DIR",
        default_value = quilt::store::DEFAULT_STORE_DIR
    )]
    store: PathBuf,

    /// client config file
    #[arg(short, long, env = "QUILT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// build a package from a build file or a directory
    Build {
        /// owner/package
        package: String,

        /// build.yml or data directory
        path: PathBuf,

        /// compute the hash without writing anything
        #[arg(long)]
        dry_run: bool,

        /// yaml file with named checks
        #[arg(long)]
        checks: Option<PathBuf>,
    },

    /// write a build.yml describing a directory
    Generate {
        /// data directory
        #[arg(default_value = ".")]
        directory: PathBuf,
    },

    /// install a package from the registry
    Install {
        /// [team:]owner/package[/sub/path][:h:HASH|:t:TAG|:v:VERSION], or @requirements.yml
        package: String,

        /// instance hash, possibly abbreviated
        #[arg(short = 'x', long, group = "selector")]
        hash: Option<String>,

        #[arg(short, long, group = "selector")]
        tag: Option<String>,

        #[arg(short = 'v', long = "version", group = "selector")]
        pkg_version: Option<String>,

        /// replace a package that is already installed
        #[arg(short, long)]
        force: bool,

        /// download worker threads
        #[arg(long, default_value_t = 0)]
        workers: usize,
    },

    /// push a package to the registry
    Push {
        /// [team:]owner/package
        package: String,

        /// make the package public
        #[arg(long)]
        public: bool,

        /// share the package with the team
        #[arg(long)]
        team: bool,

        /// upload every fragment, even ones the registry has
        #[arg(long)]
        reupload: bool,

        /// upload worker threads
        #[arg(long, default_value_t = 0)]
        workers: usize,
    },

    /// manage registry tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },

    /// manage registry versions
    Version {
        #[command(subcommand)]
        command: VersionCommands,
    },

    /// show pushed instances of a package
    Log {
        /// [team:]owner/package
        package: String,
    },

    /// remove local packages and their unreferenced objects
    Rm {
        /// owner/package
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// show a package tree
    Inspect {
        /// owner/package[/sub/path]
        package: String,

        /// instance hash; latest when omitted
        #[arg(long)]
        hash: Option<String>,
    },

    /// list installed packages
    Ls,

    /// remove objects that no package references
    Prune,
}

#[derive(Subcommand)]
enum TagCommands {
    /// point a tag at an instance
    Add {
        package: String,
        tag: String,
        hash: String,
    },
    List {
        package: String,
    },
    Remove {
        package: String,
        tag: String,
    },
}

#[derive(Subcommand)]
enum VersionCommands {
    /// register a version for an instance
    Add {
        package: String,
        version: String,
        hash: String,
    },
    List {
        package: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn load_config(cli: &Cli) -> quilt::Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load_or_default(path)?,
        None => Config::default(),
    };
    Ok(config.with_env())
}

fn registry(config: &Config, pkg: &PackageRef) -> quilt::Result<RegistryClient> {
    RegistryClient::from_config(config, pkg.team.as_deref())
}

fn run(cli: Cli) -> quilt::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Build {
            package,
            path,
            dry_run,
            checks,
        } => {
            let store = Store::open(&cli.store)?;
            let pkg = PackageRef::parse(&package)?;
            let options = BuildOptions {
                dry_run,
                checks_file: checks,
                ..BuildOptions::default()
            };
            let outcome = build_from_path(&store, &pkg, &path, &options)?;
            if outcome.dry_run {
                println!("{} (dry run)", outcome.hash);
            } else {
                println!("built {} {}", pkg, outcome.hash);
            }
        }

        Commands::Generate { directory } => {
            let path = generate_build_file(&directory)?;
            println!("generated {}", path.display());
        }

        Commands::Install {
            package,
            hash,
            tag,
            pkg_version,
            force,
            workers: _,
        } if package.starts_with('@') || package.contains('\n') => {
            if hash.is_some() || tag.is_some() || pkg_version.is_some() {
                return Err(Error::InvalidReference(
                    "requirements files carry their own hashes, tags and versions".to_string(),
                ));
            }
            let store = Store::open(&cli.store)?;
            for (pkg, result) in install_requirements(&store, &config, &package, force)? {
                println!("installed {} {}", pkg, result.hash);
            }
        }

        Commands::Install {
            package,
            hash,
            tag,
            pkg_version,
            force,
            workers,
        } => {
            let (pkg, suffix) = PackageRef::parse_extended(&package)?;
            let flag = hash
                .map(Selector::Hash)
                .or(tag.map(Selector::Tag))
                .or(pkg_version.map(Selector::Version));
            if suffix.is_some() && flag.is_some() {
                return Err(Error::InvalidReference(format!(
                    "{}: give a hash, tag or version only once",
                    package
                )));
            }
            let store = Store::open(&cli.store)?;
            let client = registry(&config, &pkg)?;
            let options = InstallOptions {
                selector: suffix.or(flag),
                force,
                workers,
            };
            let result = install(&store, &client, &config.transfer, &pkg, &options)?;
            println!("installed {} {}", pkg, result.hash);
            println!(
                "transferred: {} fragments, {} bytes",
                result.fragments, result.bytes_transferred
            );
        }

        Commands::Push {
            package,
            public,
            team,
            reupload,
            workers,
        } => {
            let store = Store::open(&cli.store)?;
            let pkg = PackageRef::parse(&package)?;
            let client = registry(&config, &pkg)?;
            let options = PushOptions {
                is_public: public,
                is_team: team,
                reupload,
                workers,
                ..PushOptions::default()
            };
            let result = push(&store, &client, &config.transfer, &pkg, &options)?;
            println!("pushed {} {}", pkg, result.hash);
            println!(
                "transferred: {} fragments, {} bytes",
                result.fragments, result.bytes_transferred
            );
            if let Some(url) = result.package_url {
                println!("{}", url);
            }
        }

        Commands::Tag { command } => match command {
            TagCommands::Add { package, tag, hash } => {
                let pkg = PackageRef::parse(&package)?;
                let hash = tag_add(&registry(&config, &pkg)?, &pkg, &tag, &hash)?;
                println!("{} -> {}", tag, hash);
            }
            TagCommands::List { package } => {
                let pkg = PackageRef::parse(&package)?;
                for entry in tag_list(&registry(&config, &pkg)?, &pkg)? {
                    println!("{}: {}", entry.tag, entry.hash);
                }
            }
            TagCommands::Remove { package, tag } => {
                let pkg = PackageRef::parse(&package)?;
                tag_remove(&registry(&config, &pkg)?, &pkg, &tag)?;
                println!("removed tag {}", tag);
            }
        },

        Commands::Version { command } => match command {
            VersionCommands::Add {
                package,
                version,
                hash,
            } => {
                let pkg = PackageRef::parse(&package)?;
                let (version, hash) = version_add(&registry(&config, &pkg)?, &pkg, &version, &hash)?;
                println!("{} -> {}", version, hash);
            }
            VersionCommands::List { package } => {
                let pkg = PackageRef::parse(&package)?;
                for entry in version_list(&registry(&config, &pkg)?, &pkg)? {
                    println!("{}: {}", entry.version, entry.hash);
                }
            }
        },

        Commands::Log { package } => {
            let pkg = PackageRef::parse(&package)?;
            for entry in log(&registry(&config, &pkg)?, &pkg)? {
                let created = entry.created.map(|t| format!("{:.0}", t)).unwrap_or_default();
                let author = entry.author.unwrap_or_default();
                println!("{}  {:>12}  {}", entry.hash, created, author);
            }
        }

        Commands::Rm { packages } => {
            let store = Store::open(&cli.store)?;
            let mut removed = BTreeSet::new();
            for package in &packages {
                let pkg = PackageRef::parse(package)?;
                let stats = rm(&store, &pkg.owner, &pkg.name)?;
                removed.extend(stats.removed);
                println!("removed {}", pkg.short_name());
            }
            println!("freed {} objects", removed.len());
        }

        Commands::Inspect { package, hash } => {
            let store = Store::open(&cli.store)?;
            let pkg = PackageRef::parse(&package)?;
            let hash = hash.as_deref().map(Hash::from_hex).transpose()?;
            print!("{}", inspect(&store, &pkg, hash.as_ref())?);
        }

        Commands::Ls => {
            let store = Store::open(&cli.store)?;
            for row in ls(&store)? {
                println!("{:<30} {:<10} {}", row.package, row.tag, row.hash);
            }
        }

        Commands::Prune => {
            let store = Store::open(&cli.store)?;
            let stats = prune(&store, None)?;
            println!(
                "removed {} objects, freed {} bytes",
                stats.removed.len(),
                stats.bytes_freed
            );
        }
    }

    Ok(())
}

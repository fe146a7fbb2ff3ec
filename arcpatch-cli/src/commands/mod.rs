use std::path::PathBuf;
use std::str::FromStr;

use arcpatch::config::EngineConfig;
use arcpatch::installation::GameInstallation;
use arcpatch::manifest::ArchiveLocation;
use clap::{Args, Subcommand};
use uuid::Uuid;

pub mod apply;
pub mod container;
pub mod patch;

/// Archive declaration: `<path relative to the game root>=<format>`
#[derive(Debug, Clone)]
pub struct ArchiveArg(pub ArchiveLocation);

impl FromStr for ArchiveArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('=') {
            Some((path, manager)) if !path.is_empty() && !manager.is_empty() => {
                let location = ArchiveLocation::new(path, manager.to_lowercase());
                location.validate().map_err(|err| err.to_string())?;
                Ok(ArchiveArg(location))
            }
            _ => Err(format!(
                "Invalid archive '{s}'. Expected <path>=<format>, e.g. Data/Fix.cnt=cnt"
            )),
        }
    }
}

/// The game installation a command works on
#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Game installation root
    #[arg(short, long)]
    pub game: PathBuf,

    /// Game id matched against a patch's target games (default: root folder name)
    #[arg(long)]
    pub game_id: Option<String>,

    /// Archive inside the installation, as <path>=<format> (cnt, big, ipk)
    #[arg(short, long = "archive")]
    pub archives: Vec<ArchiveArg>,
}

impl InstallArgs {
    pub fn installation(&self) -> GameInstallation {
        let game_id = self.game_id.clone().unwrap_or_else(|| {
            self.game
                .file_name()
                .map_or_else(String::new, |n| n.to_string_lossy().to_lowercase())
        });
        self.archives
            .iter()
            .fold(GameInstallation::new(game_id, &self.game), |install, archive| {
                install.with_archive(archive.0.clone())
            })
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scaffold a patch authoring folder
    Setup {
        /// Folder to create
        dir: PathBuf,
    },

    /// Export an authoring folder as a patch package
    Create {
        /// Authoring folder
        #[arg(short, long)]
        source: PathBuf,

        /// Output package (.ap)
        #[arg(short, long)]
        destination: PathBuf,

        /// Patch name (default: folder name)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        author: Option<String>,

        /// Target game id (repeatable)
        #[arg(long = "target-game")]
        games: Vec<String>,

        /// Archive the patch can route files into, as <path>=<format>
        #[arg(short, long = "archive")]
        archives: Vec<ArchiveArg>,
    },

    /// Import a patch package into the library
    Import {
        /// Package to import
        package: PathBuf,

        /// Import under a fresh id instead of updating an existing patch
        #[arg(long)]
        copy: bool,
    },

    /// List (or prune) the patch library
    Library {
        /// Remove a patch from the library
        #[arg(long)]
        remove: Option<Uuid>,
    },

    /// Add a patch to an installation's container
    Add {
        #[command(flatten)]
        install: InstallArgs,

        /// Library patch id or path to a package
        patch: String,

        /// Add without enabling
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a patch from an installation's container
    Remove {
        #[command(flatten)]
        install: InstallArgs,

        id: Uuid,
    },

    /// List patches known to an installation
    List {
        #[command(flatten)]
        install: InstallArgs,
    },

    /// Enable a patch, optionally at a position in the apply order
    Enable {
        #[command(flatten)]
        install: InstallArgs,

        id: Uuid,

        /// Zero-based position in the apply order
        #[arg(long)]
        position: Option<usize>,
    },

    /// Disable a patch
    Disable {
        #[command(flatten)]
        install: InstallArgs,

        id: Uuid,
    },

    /// Apply the enabled patches
    Apply {
        #[command(flatten)]
        install: InstallArgs,

        /// Suppress progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Restore the installation's original files
    Restore {
        #[command(flatten)]
        install: InstallArgs,

        /// Suppress progress bar
        #[arg(short, long)]
        quiet: bool,
    },
}

impl Commands {
    pub fn execute(&self, config: &EngineConfig) -> anyhow::Result<()> {
        match self {
            Commands::Setup { dir } => patch::setup(dir),
            Commands::Create {
                source,
                destination,
                name,
                description,
                author,
                games,
                archives,
            } => patch::create(
                config,
                &patch::CreateOptions {
                    source,
                    destination,
                    name: name.as_deref(),
                    description,
                    author: author.as_deref(),
                    games,
                    archives,
                },
            ),
            Commands::Import { package, copy } => patch::import(config, package, *copy),
            Commands::Library { remove } => patch::library(config, *remove),
            Commands::Add {
                install,
                patch,
                disabled,
            } => container::add(config, &install.installation(), patch, !*disabled),
            Commands::Remove { install, id } => container::remove(&install.installation(), *id),
            Commands::List { install } => container::list(&install.installation()),
            Commands::Enable {
                install,
                id,
                position,
            } => container::enable(&install.installation(), *id, *position),
            Commands::Disable { install, id } => container::disable(&install.installation(), *id),
            Commands::Apply { install, quiet } => {
                apply::apply(config, &install.installation(), *quiet)
            }
            Commands::Restore { install, quiet } => {
                apply::restore(config, &install.installation(), *quiet)
            }
        }
    }
}

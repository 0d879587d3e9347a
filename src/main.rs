//! crabtree CLI - Build and inspect canonical statement trees

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use colored::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use crabtree::{BuildConfig, DtsLoader, StatementCategory, Taxonomy, Tree, TreeNode};

/// Canonical statement trees from XBRL presentation linkbases
#[derive(ClapParser)]
#[command(name = "crabtree")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build statement trees from a taxonomy schema
    Build {
        /// Entry schema
        schema: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Concept to root each statement at
        #[arg(long, default_value = crabtree::DEFAULT_STARTING_CONCEPT)]
        starting_concept: String,

        /// Root each statement at its presentation root instead
        #[arg(long, conflicts_with = "starting_concept")]
        no_starting_concept: bool,

        /// Concept allowed to repeat at one position
        #[arg(long = "allow-duplicate", value_name = "CONCEPT")]
        allowed_duplicates: Vec<String>,

        /// Show statistics
        #[arg(short, long)]
        stats: bool,
    },

    /// Print stored statement trees
    Show {
        /// Taxonomy file
        input: PathBuf,

        /// Only this category
        #[arg(short, long)]
        category: Option<StatementCategory>,

        /// Maximum depth below the root
        #[arg(short, long)]
        depth: Option<usize>,

        /// Only nodes with a debit or credit balance
        #[arg(long)]
        only_signed: bool,
    },

    /// Find every occurrence of a concept
    Find {
        /// Taxonomy file
        input: PathBuf,

        /// Qualified concept name, e.g. us-gaap:Revenues
        concept: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            schema,
            output,
            starting_concept,
            no_starting_concept,
            allowed_duplicates,
            stats,
        } => {
            let start = Instant::now();
            let dts = DtsLoader::load(&schema)
                .with_context(|| format!("Failed to load {}", schema.display()))?;
            let loaded = start.elapsed();

            let starting_concept = (!no_starting_concept).then_some(starting_concept.as_str());
            let config = allowed_duplicates
                .iter()
                .fold(BuildConfig::default().with_starting_concept(starting_concept), |config, name| {
                    config.allow_duplicate(name)
                });

            let taxonomy = Taxonomy::build(&dts, &config);
            let built = start.elapsed() - loaded;
            taxonomy
                .save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            println!("{} {}", "✓".green().bold(), output.display());
            for category in StatementCategory::ALL {
                println!("  {}: {}", category, taxonomy.trees(category).len());
            }

            if stats {
                let nodes: usize = taxonomy.iter().map(|(_, tree)| tree.len()).sum();
                println!("  Concepts: {}", dts.concepts().len());
                println!("  Nodes: {}", nodes);
                println!("  Load: {:.2}ms", loaded.as_secs_f64() * 1000.0);
                println!("  Build: {:.2}ms", built.as_secs_f64() * 1000.0);
            }
        }

        Commands::Show {
            input,
            category,
            depth,
            only_signed,
        } => {
            let taxonomy = load(&input)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();

            for (cat, tree) in taxonomy.iter() {
                if category.is_some_and(|c| c != cat) {
                    continue;
                }
                write!(out, "{} ", format!("[{}]", cat).cyan())?;
                tree.print(
                    &mut out,
                    |node| !only_signed || is_signed(node),
                    |node| depth.map_or(true, |max| depth_of(tree, node) <= max),
                )?;
                writeln!(out)?;
            }
        }

        Commands::Find { input, concept } => {
            let taxonomy = load(&input)?;
            let mut found = 0;

            for category in StatementCategory::ALL {
                let index = taxonomy.node_index(category, |_| true);
                let Some(occurrences) = index.get(concept.as_str()) else {
                    continue;
                };
                for occurrence in occurrences {
                    let node = occurrence.node();
                    let chain: Vec<&str> = occurrence
                        .tree
                        .ancestors(occurrence.id)
                        .map(|id| occurrence.tree.node(id).name.as_str())
                        .collect();
                    println!(
                        "{} {} [{}] {}",
                        format!("[{}]", category).cyan(),
                        occurrence.tree.title().bold(),
                        node.label_type,
                        node.balance
                    );
                    println!("  {} <- {}", node.name, chain.join(" <- "));
                    found += 1;
                }
            }

            if found == 0 {
                println!("{} {} not found", "✗".red().bold(), concept);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load(path: &Path) -> Result<Taxonomy> {
    match Taxonomy::load(path) {
        Some(taxonomy) => Ok(taxonomy),
        None => bail!("Failed to read taxonomy from {}", path.display()),
    }
}

fn is_signed(node: &TreeNode) -> bool {
    node.balance.signed().is_some() || node.sub_tree_balance.is_some()
}

fn depth_of(tree: &Tree, node: &TreeNode) -> usize {
    std::iter::successors(node.parent(), |&id| tree.node(id).parent()).count()
}

use clap::{Args as ClapArgs, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about, version, name = "otfc")]
/// Resolves virtual predicates in SPARQL queries
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print a query with its substitution predicates replaced by their templates
    Rewrite {
        #[command(flatten)]
        predicates: PredicateArgs,
        /// File containing the query
        ///
        /// If no file is given, stdin is read.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        query: Option<PathBuf>,
    },
    /// Resolve the virtual predicates of a SELECT query and evaluate it against a SPARQL endpoint
    ///
    /// The solutions are written to stdout as SPARQL JSON results.
    Query {
        #[command(flatten)]
        predicates: PredicateArgs,
        /// URL of the SPARQL endpoint holding the data
        #[arg(short, long, value_hint = ValueHint::Url)]
        endpoint: String,
        /// File containing the query
        ///
        /// If no file is given, stdin is read.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        query: Option<PathBuf>,
        /// Timeout of every network call, in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
    /// Print the metadata of all virtual predicates as JSON
    Meta {
        #[command(flatten)]
        predicates: PredicateArgs,
    },
}

/// Where the virtual predicates come from.
#[derive(ClapArgs)]
pub struct PredicateArgs {
    /// Base URL of a predicate registry
    #[arg(short, long, value_hint = ValueHint::Url)]
    pub registry: Vec<String>,
    /// A substitution predicate, given as IRI=FILE where FILE contains the template query
    #[arg(short, long, value_name = "IRI=FILE")]
    pub substitution: Vec<String>,
}

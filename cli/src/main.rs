use crate::cli::{Args, Command, PredicateArgs};
use anyhow::{bail, Context};
use clap::Parser;
use futures::TryStreamExt;
use otfc_engine::evaluation::DataSource;
use otfc_engine::{EngineConfig, EngineState};
use otfc_model::NamedNode;
use sparesults::{QueryResultsFormat, QueryResultsSerializer};
use std::fs;
use std::io::{self, stdin, stdout, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let matches = Args::parse();
    match matches.command {
        Command::Rewrite { predicates, query } => {
            let engine = engine(EngineConfig::default(), &predicates).await?;
            let query = read_query(query.as_deref())?;
            let rewritten = engine.rewrite(&query)?;
            let mut stdout = stdout().lock();
            writeln!(stdout, "{rewritten}")?;
            stdout.flush()?;
            Ok(())
        }
        Command::Query {
            predicates,
            endpoint,
            query,
            timeout,
        } => {
            let config = EngineConfig {
                http_timeout: Duration::from_secs(timeout),
                ..EngineConfig::default()
            };
            let engine = engine(config, &predicates).await?;
            let query = read_query(query.as_deref())?;
            let context = engine.context(vec![DataSource::Endpoint(endpoint)]);
            let solutions = engine
                .query(&query, context)
                .await?
                .try_collect::<Vec<_>>()
                .await
                .context("Failed to evaluate the query")?;

            let variables = solutions
                .first()
                .map(|solution| solution.variables().to_vec())
                .unwrap_or_default();
            let mut serializer = QueryResultsSerializer::from_format(QueryResultsFormat::Json)
                .serialize_solutions_to_writer(stdout().lock(), variables)?;
            for solution in &solutions {
                serializer.serialize(solution)?;
            }
            serializer.finish()?.flush()?;
            Ok(())
        }
        Command::Meta { predicates } => {
            let engine = engine(EngineConfig::default(), &predicates).await?;
            let mut stdout = stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &engine.meta())?;
            writeln!(stdout)?;
            Ok(())
        }
    }
}

/// Creates an engine with the predicates of the registries and the substitution files.
async fn engine(config: EngineConfig, predicates: &PredicateArgs) -> anyhow::Result<EngineState> {
    let config = EngineConfig {
        registries: predicates.registry.clone(),
        ..config
    };
    let engine = EngineState::new(config).context("Failed to create the HTTP client")?;
    for argument in &predicates.substitution {
        let (iri, file) = parse_substitution(argument)?;
        let template = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read the template {}", file.display()))?;
        engine
            .substitute(iri, &template)
            .with_context(|| format!("Failed to register the template {}", file.display()))?;
    }
    let warnings = engine.load_registries().await;
    if !warnings.is_empty() {
        tracing::warn!("{} predicate source(s) were skipped", warnings.len());
    }
    Ok(engine)
}

fn parse_substitution(argument: &str) -> anyhow::Result<(NamedNode, PathBuf)> {
    let Some((iri, file)) = argument.split_once('=') else {
        bail!("The substitution '{argument}' is not of the form IRI=FILE")
    };
    let iri = NamedNode::new(iri.trim_start_matches('<').trim_end_matches('>'))
        .with_context(|| format!("The predicate {iri} is not a valid IRI"))?;
    Ok((iri, PathBuf::from(file)))
}

fn read_query(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(file) => fs::read_to_string(file)
            .with_context(|| format!("Failed to read the query {}", file.display())),
        None => {
            let mut query = String::new();
            stdin()
                .lock()
                .read_to_string(&mut query)
                .context("Failed to read the query from stdin")?;
            Ok(query)
        }
    }
}

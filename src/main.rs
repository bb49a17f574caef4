use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use leadloop::channel::{ConsoleChannel, RetryingChannel};
use leadloop::classifier::Tone;
use leadloop::config::EngineConfig;
use leadloop::database::SalesDatabase;
use leadloop::engine::{ConversationEngine, RosterEntry};
use leadloop::funnel::Stage;
use leadloop::scripts;

const DEFAULT_PRODUCT: &str = "Ebook de Marketing Digital";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,leadloop=debug")),
        )
        .init();

    let config = EngineConfig::load();

    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {:?}", parent))?;
    }
    let db = Arc::new(
        SalesDatabase::new(&config.database_path)
            .with_context(|| format!("failed to open store at {}", config.database_path))?,
    );
    tracing::info!("store ready at {}", config.database_path);

    let mut product = prompt("\n📝 Qual produto/serviço você está vendendo? ")?;
    if product.is_empty() {
        product = DEFAULT_PRODUCT.to_string();
    }

    if prompt("\n🧠 Deseja adicionar novos scripts de resposta? (s/n): ")?
        .eq_ignore_ascii_case("s")
    {
        training_session(&db)?;
    }

    let roster = register_contacts()?;
    if roster.is_empty() {
        println!("⚠️  Nenhum contato cadastrado. Encerrando...");
        return Ok(());
    }

    let channel = Arc::new(RetryingChannel::new(
        ConsoleChannel::new(),
        config.send_attempts,
        config.send_retry_delay(),
    ));
    let engine = ConversationEngine::new(db, channel, config, product);

    println!("\n🤖 Iniciando atendimento automático...");
    let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    rt.block_on(engine.run_forever(roster))
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Interactive rule training: stage, keyword, template, tone.
fn training_session(db: &SalesDatabase) -> Result<()> {
    println!("\nModo de Treinamento");
    let stage = Stage::from_db(&prompt(
        "Estágio do funil (prospecting, nurturing, objection, closing, follow_up): ",
    )?);
    let keyword = prompt("Palavra-chave para acionar a resposta: ")?.to_lowercase();
    let response = prompt(
        "Resposta ideal (use {contact_name}, {product}, {benefit}, {pain_point}, {industry}): ",
    )?;
    let tone = Tone::from_db(&prompt("Tom da resposta (professional, casual, formal): ")?);

    scripts::train_rule(db, stage, &keyword, &response, tone)?;
    println!("Treinamento salvo com sucesso!");
    Ok(())
}

/// Newline-delimited contact entry, `sair` to finish.
fn register_contacts() -> Result<Vec<RosterEntry>> {
    println!("\n👥 Cadastro de Contatos (digite 'sair' para terminar):");
    println!("Formato: Nome;Indústria;Ponto de Dor");
    println!("Exemplo: João Silva;Varejo;Falta de clientes");

    let mut roster = Vec::new();
    loop {
        let line = prompt("Contato: ")?;
        if line.eq_ignore_ascii_case("sair") {
            break;
        }
        match RosterEntry::parse(&line) {
            Some(entry) => roster.push(entry),
            None => {
                if !line.is_empty() {
                    println!("Entrada inválida, use Nome;Indústria;Ponto de Dor");
                }
            }
        }
    }
    Ok(roster)
}

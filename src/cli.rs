//! Interface de linha de comando do roost baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status)
//! e flags globais (--config, --verbose).

use clap::{Parser, Subcommand};

/// roost, supervisor de processos e launcher para um serviço web local.
#[derive(Debug, Parser)]
#[command(name = "roost", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = "roost.toml")]
    pub config: String,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o serviço e o supervisiona até Ctrl-C; SIGHUP reinicia.
    Run {
        /// Suprime a saída do console do serviço no terminal.
        #[arg(long, default_value_t = false)]
        quiet: bool,
    },

    /// Verifica a disponibilidade do serviço.
    Status {
        /// Emite o resultado em JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Monitora continuamente até Ctrl-C.
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
}

//! Interface de linha de comando do polymath baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, submit,
//! status, watch, rethink, learn) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::state_machine::JobMode;

/// polymath: jobs de aquisição de conhecimento com failover de provedores.
#[derive(Debug, Parser)]
#[command(name = "polymath", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./polymath.toml).
    #[arg(long, short, global = true, env = "POLYMATH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Modo de job aceito pela CLI, mapeado para [`JobMode`] internamente.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Aprende alguns conceitos da fila de desconhecidos.
    Quick,
    /// Aprende toda a fila e aprofunda conceitos conhecidos.
    Deep,
    /// Loop de rodadas limitado pelo horizonte de tempo.
    Big,
}

impl From<ModeArg> for JobMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Quick => JobMode::Quick,
            ModeArg::Deep => JobMode::Deep,
            ModeArg::Big => JobMode::Big,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sobe o servidor HTTP com o pool de workers.
    Serve {
        /// Endereço de escuta; sobrepõe `server.bind` da configuração.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Executa um job neste processo e acompanha o progresso.
    Submit {
        /// Modo do job.
        #[arg(value_enum)]
        mode: ModeArg,
    },

    /// Mostra o snapshot atual de um job.
    Status {
        /// Identificador do job.
        id: String,
    },

    /// Acompanha um job até o estado terminal.
    Watch {
        /// Identificador do job.
        id: String,
    },

    /// Pesquisa de novo uma pergunta e produz uma resposta corrigida.
    Rethink {
        /// A pergunta original.
        question: String,

        /// A resposta anterior considerada incorreta.
        #[arg(long)]
        previous: Option<String>,
    },

    /// Coloca um conceito na fila de desconhecidos.
    Learn {
        /// O conceito a aprender.
        concept: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_submit_subcommand() {
        let cli = Cli::parse_from(["polymath", "submit", "big"]);
        match cli.command {
            Command::Submit { mode } => assert_eq!(JobMode::from(mode), JobMode::Big),
            _ => panic!("expected Submit command"),
        }
    }

    #[test]
    fn cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["polymath", "submit", "huge"]).is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "polymath",
            "--config",
            "/tmp/p.toml",
            "--verbose",
            "status",
            "abc",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
        assert!(matches!(cli.command, Command::Status { id } if id == "abc"));
    }

    #[test]
    fn cli_parses_rethink_subcommand() {
        let cli = Cli::parse_from([
            "polymath",
            "rethink",
            "what is osmosis",
            "--previous",
            "a dance",
        ]);
        match cli.command {
            Command::Rethink { question, previous } => {
                assert_eq!(question, "what is osmosis");
                assert_eq!(previous.as_deref(), Some("a dance"));
            }
            _ => panic!("expected Rethink command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}

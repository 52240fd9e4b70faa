//! Interface de terminal do roost: spinner de estado e saída do console.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`StatusSpinner`] acompanha visualmente o ciclo
//! de vida do serviço; o [`TermConsole`] escreve a saída capturada do filho
//! no terminal.

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};

use crate::render::RenderTarget;
use crate::supervisor::ProcessState;

/// Indicador visual do ciclo de vida do serviço no terminal.
///
/// Exibe um spinner animado com o estado atual e mensagens coloridas para
/// disponibilidade (verde) e falha (vermelho).
pub struct StatusSpinner {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
}

impl StatusSpinner {
    /// Inicia o spinner com o nome do serviço supervisionado.
    pub fn start(service: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("STOPPED: {service}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o estado atual.
    pub fn update_state(&self, state: ProcessState) {
        self.pb.set_message(state.to_string());
        match state {
            ProcessState::Running => {
                self.pb
                    .println(format!("  {} service is up", self.green.apply_to("✓")));
            }
            ProcessState::Error => {
                self.pb
                    .println(format!("  {} service failed", self.red.apply_to("✗")));
            }
            _ => {}
        }
    }

    /// Finaliza e remove o spinner.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Saída do console do serviço no terminal.
pub struct TermConsole {
    term: Term,
    dim: Style,
}

impl TermConsole {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
            dim: Style::new().dim(),
        }
    }
}

impl RenderTarget for TermConsole {
    fn full_render(&self, lines: &[String], _auto_scroll: bool) {
        let _ = self.term.clear_screen();
        for line in lines {
            let _ = self.term.write_line(&format!("{}", self.dim.apply_to(line)));
        }
    }

    fn append_lines(&self, lines: &[String], _auto_scroll: bool) -> anyhow::Result<()> {
        for line in lines {
            self.term.write_line(&format!("{}", self.dim.apply_to(line)))?;
        }
        Ok(())
    }
}

/// Imprime o resultado de uma sondagem de disponibilidade.
pub fn print_health_status(url: &str, healthy: bool) {
    if healthy {
        let green = Style::new().green().bold();
        println!("{} {url} is healthy", green.apply_to("✓"));
    } else {
        let red = Style::new().red().bold();
        println!("{} {url} is unreachable", red.apply_to("✗"));
    }
}

/// Imprime o diagnóstico de erro: código de saída e cauda da saída recente.
pub fn print_error_diagnostics(exit_code: Option<i32>, tail: &[String]) {
    let red = Style::new().red().bold();
    let dim = Style::new().dim();
    println!();
    println!("{}", red.apply_to("service ended in error"));
    match exit_code {
        Some(code) => println!("last exit code: {code}"),
        None => println!("last exit code: unknown"),
    }
    if !tail.is_empty() {
        println!("recent output:");
        for line in tail {
            println!("  {}", dim.apply_to(line));
        }
    }
}

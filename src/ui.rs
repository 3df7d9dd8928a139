//! Interface de terminal do polymath: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de progresso de um job e `console` para
//! estilização com cores. O [`JobProgress`] acompanha os snapshots de um
//! job até o estado terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::rethink::RethinkOutcome;
use crate::state_machine::{JobStatus, JobView};

/// Indicador visual de progresso para um job acompanhado no terminal.
///
/// A barra vai de 0 a 100 e a mensagem mostra status, rodada e conceitos
/// aprendidos. Erros novos são impressos acima da barra em amarelo.
pub struct JobProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    // Quantos erros do snapshot já foram impressos.
    errors_seen: usize,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Cria a barra para o job e mostra o primeiro snapshot.
    pub fn start(view: &JobView) -> Self {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        let mut progress = Self {
            pb,
            errors_seen: 0,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        };
        progress.update(view);
        progress
    }

    /// Aplica um snapshot novo à barra.
    pub fn update(&mut self, view: &JobView) {
        self.pb.set_position(u64::from(view.progress));
        self.pb.set_message(format!(
            "{} {} | rodada {} | {} conceitos",
            view.mode, view.status, view.last_round, view.total_tokens
        ));
        for error in view.errors.iter().skip(self.errors_seen) {
            let scope = match (&error.round, &error.concept) {
                (Some(round), Some(concept)) => format!("[r{round} {concept}] "),
                (Some(round), None) => format!("[r{round}] "),
                (None, Some(concept)) => format!("[{concept}] "),
                (None, None) => String::new(),
            };
            self.pb.println(format!(
                "  {} {scope}{}: {}",
                self.yellow.apply_to("!"),
                error.kind,
                error.message
            ));
        }
        self.errors_seen = self.errors_seen.max(view.errors.len());
    }

    /// Finaliza a barra e exibe o resultado do job.
    ///
    /// Sucesso é mostrado em verde com checkmark; falha em vermelho com X.
    pub fn finish(&mut self, view: &JobView) {
        self.update(view);
        self.pb.finish_and_clear();
        match view.status {
            JobStatus::Completed => println!(
                "  {} Job {} concluído: {} conceitos em {} rodadas",
                self.green.apply_to("✓"),
                view.id,
                view.total_tokens,
                view.last_round
            ),
            JobStatus::Failed => println!(
                "  {} Job {} falhou ({} erros)",
                self.red.apply_to("✗"),
                view.id,
                view.errors.len()
            ),
            status => println!("  Job {} parado em {status}", view.id),
        }
    }
}

/// Imprime um snapshot formatado em JSON com cor conforme o status.
pub fn print_view(view: &JobView) {
    let style = match view.status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        _ => Style::new().yellow(),
    };
    println!("{}", style.apply_to(format!("─── Job {} ───", view.id)));
    println!("{}", serde_json::to_string_pretty(view).unwrap_or_default());
}

/// Imprime a resposta corrigida; respostas degradadas aparecem em amarelo.
pub fn print_rethink(outcome: &RethinkOutcome) {
    match &outcome.provider {
        Some(provider) => println!(
            "{} {}",
            Style::new().green().bold().apply_to("✓"),
            Style::new().dim().apply_to(format!("via {provider}"))
        ),
        None => println!("{}", Style::new().yellow().apply_to("! resposta degradada")),
    }
    println!("{}", outcome.answer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::state_machine::{ErrorDescriptor, Job, JobMode};

    fn view_with(progress: u8, errors: usize) -> JobView {
        let mut job = Job::new(JobMode::Big, std::time::Duration::from_secs(60));
        job.progress = progress;
        job.errors = (0..errors)
            .map(|i| ErrorDescriptor::new(ErrorKind::Research, format!("e{i}")).in_round(1))
            .collect();
        job.view()
    }

    #[test]
    fn update_tracks_position_and_errors() {
        let mut progress = JobProgress::start(&view_with(10, 1));
        assert_eq!(progress.pb.position(), 10);
        assert_eq!(progress.errors_seen, 1);

        progress.update(&view_with(40, 3));
        assert_eq!(progress.pb.position(), 40);
        assert_eq!(progress.errors_seen, 3);
        assert!(progress.pb.message().contains("big queued"));

        let mut done = view_with(100, 3);
        done.status = JobStatus::Completed;
        progress.finish(&done);
        assert!(progress.pb.is_finished());
    }
}

//! Chat command grammar, help text and inline menus.
//!
//! Report commands: `/semana`, `/semanapassada`, `/mes`, `/mespassado`,
//! `/ano`, `/anopassado` (plus `/ultima_semana`, `/ultimo_mes`, `/ultimo_ano`).
//! Export commands: `/exportar[_<categoria>][_<periodo>]`.

use crate::exports::ExportCategory;
use crate::periods::{ExportPeriod, ReportKind};
use crate::telegram_models::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Prefix of inline-button payloads that carry a command.
pub const CALLBACK_COMMAND_PREFIX: &str = "cmd:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    All,
    Only(ExportCategory),
}

impl ExportScope {
    pub fn categories(&self) -> Vec<ExportCategory> {
        match self {
            ExportScope::All => ExportCategory::ALL.to_vec(),
            ExportScope::Only(c) => vec![*c],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRequest {
    pub scope: ExportScope,
    pub period: ExportPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Menu,
    Report(ReportKind),
    Export(ExportRequest),
}

/// Menus reachable from inline buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuPage {
    Main,
    Reports,
    Exports,
}

/// Lowercases, trims and strips a `@botname` suffix (`/semana@MyBot` → `/semana`).
pub fn normalize_command(text: &str) -> String {
    let first = text.split_whitespace().next().unwrap_or("").to_lowercase();
    match first.split_once('@') {
        Some((cmd, _)) => cmd.to_string(),
        None => first,
    }
}

fn parse_period(slug: &str) -> Option<ExportPeriod> {
    Some(match slug {
        "15dias" => ExportPeriod::Last15Days,
        "semana" => ExportPeriod::Report(ReportKind::Weekly),
        "semanapassada" => ExportPeriod::Report(ReportKind::LastWeek),
        "mes" => ExportPeriod::Report(ReportKind::CurrentMonth),
        "mespassado" => ExportPeriod::Report(ReportKind::LastMonth),
        "ano" => ExportPeriod::Report(ReportKind::YearToDate),
        "anopassado" => ExportPeriod::Report(ReportKind::LastYear),
        _ => return None,
    })
}

pub fn period_slug(period: ExportPeriod) -> Option<&'static str> {
    Some(match period {
        ExportPeriod::All => return None,
        ExportPeriod::Last15Days => "15dias",
        ExportPeriod::Report(ReportKind::Weekly) => "semana",
        ExportPeriod::Report(ReportKind::LastWeek) => "semanapassada",
        ExportPeriod::Report(ReportKind::CurrentMonth) => "mes",
        ExportPeriod::Report(ReportKind::LastMonth) => "mespassado",
        ExportPeriod::Report(ReportKind::YearToDate) => "ano",
        ExportPeriod::Report(ReportKind::LastYear) => "anopassado",
    })
}

fn parse_export(rest: &str) -> Option<ExportRequest> {
    if rest.is_empty() {
        return Some(ExportRequest {
            scope: ExportScope::All,
            period: ExportPeriod::All,
        });
    }
    let rest = rest.strip_prefix('_')?;

    // Longest slug first so `perdidos_followup` is not read as `perdidos` + `followup`.
    let mut categories = ExportCategory::ALL;
    categories.sort_by_key(|c| std::cmp::Reverse(c.slug().len()));

    for category in categories {
        if let Some(tail) = rest.strip_prefix(category.slug()) {
            let period = match tail {
                "" => Some(ExportPeriod::All),
                t => t.strip_prefix('_').and_then(parse_period),
            };
            if let Some(period) = period {
                return Some(ExportRequest {
                    scope: ExportScope::Only(category),
                    period,
                });
            }
        }
    }

    parse_period(rest).map(|period| ExportRequest {
        scope: ExportScope::All,
        period,
    })
}

/// Maps chat text to a command; `None` for anything unrecognized.
pub fn resolve_command(text: &str) -> Option<Command> {
    let cmd = normalize_command(text);
    match cmd.as_str() {
        "/help" | "/start" | "/ajuda" => Some(Command::Help),
        "/menu" => Some(Command::Menu),
        "/semana" => Some(Command::Report(ReportKind::Weekly)),
        "/semanapassada" | "/ultima_semana" => Some(Command::Report(ReportKind::LastWeek)),
        "/mes" => Some(Command::Report(ReportKind::CurrentMonth)),
        "/mespassado" | "/ultimo_mes" => Some(Command::Report(ReportKind::LastMonth)),
        "/ano" => Some(Command::Report(ReportKind::YearToDate)),
        "/anopassado" | "/ultimo_ano" => Some(Command::Report(ReportKind::LastYear)),
        other => other
            .strip_prefix("/exportar")
            .and_then(parse_export)
            .map(Command::Export),
    }
}

/// Canonical chat text for an export request.
pub fn export_command_text(request: &ExportRequest) -> String {
    let mut text = "/exportar".to_string();
    if let ExportScope::Only(category) = request.scope {
        text.push('_');
        text.push_str(category.slug());
    }
    if let Some(period) = period_slug(request.period) {
        text.push('_');
        text.push_str(period);
    }
    text
}

/// Interprets an inline-button payload.
pub enum CallbackAction {
    Show(MenuPage),
    Run(String),
}

pub fn resolve_callback(data: &str) -> Option<CallbackAction> {
    if let Some(cmd) = data.strip_prefix(CALLBACK_COMMAND_PREFIX) {
        return Some(CallbackAction::Run(cmd.to_string()));
    }
    match data {
        "menu_main" => Some(CallbackAction::Show(MenuPage::Main)),
        "menu_reports" => Some(CallbackAction::Show(MenuPage::Reports)),
        "menu_exports" => Some(CallbackAction::Show(MenuPage::Exports)),
        "menu_help" => Some(CallbackAction::Run("/help".to_string())),
        _ => None,
    }
}

pub fn help_message() -> String {
    let mut msg = String::from(
        "🤖 *KOMMO ANALYTICS BOT*\n\
         ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n\
         📊 *RELATÓRIOS (Texto)*\n\
         Período Atual:\n\
         \x20 /semana - Semana atual (Dom-Hoje)\n\
         \x20 /mes - Mês atual (até hoje)\n\
         \x20 /ano - Ano atual (até hoje)\n\n\
         Período Anterior:\n\
         \x20 /semanapassada - Semana passada (Dom-Sáb)\n\
         \x20 /mespassado - Mês anterior (fechado)\n\
         \x20 /anopassado - Ano anterior (retrospectiva)\n\n\
         📥 *EXPORTAR DADOS (CSV)*\n\n\
         *Exportação Completa (todas as 4 categorias):*\n\
         \x20 /exportar_15dias - Últimos 15 dias (4 arquivos)\n\
         \x20 /exportar - Histórico completo\n\
         \x20 /exportar_semana - Semana atual\n\
         \x20 /exportar_semanapassada - Semana passada\n\
         \x20 /exportar_mes - Mês atual\n\
         \x20 /exportar_mespassado - Mês anterior\n\
         \x20 /exportar_ano - Ano atual\n\
         \x20 /exportar_anopassado - Ano anterior\n\n\
         *Exportação por Categoria - Histórico Completo:*\n\
         \x20 /exportar_ganhos - Ganhos\n\
         \x20 /exportar_perdidos - Perdidos\n\
         \x20 /exportar_ativos - Ativos\n\
         \x20 /exportar_perdidos_followup - Perdidos Follow-up\n\n",
    );

    for (title, period) in [
        ("Últimos 15 dias", "15dias"),
        ("Semana Atual", "semana"),
        ("Mês Atual", "mes"),
        ("Ano Atual", "ano"),
    ] {
        msg.push_str(&format!("*Exportação por Categoria - {}:*\n", title));
        for slug in ["ganhos", "perdidos", "ativos", "perdidos_followup"] {
            msg.push_str(&format!("  /exportar_{}_{}\n", slug, period));
        }
        msg.push('\n');
    }

    msg.push_str(
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\
         📋 Menu com botões: /menu\n\
         ✨ Dúvidas? Use /help\n",
    );
    msg
}

fn row(buttons: &[(&str, &str)]) -> Vec<InlineKeyboardButton> {
    buttons
        .iter()
        .map(|(text, data)| InlineKeyboardButton::new(text, data))
        .collect()
}

pub fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            row(&[("Relatórios 📊", "menu_reports"), ("Exportações 📥", "menu_exports")]),
            row(&[("Ajuda ✨", "menu_help")]),
        ],
    }
}

pub fn reports_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            row(&[("Semana Atual", "cmd:/semana"), ("Semana Passada", "cmd:/semanapassada")]),
            row(&[("Mês Atual", "cmd:/mes"), ("Mês Passado", "cmd:/mespassado")]),
            row(&[("Ano Atual", "cmd:/ano"), ("Ano Passado", "cmd:/anopassado")]),
            row(&[("🔙 Voltar", "menu_main")]),
        ],
    }
}

pub fn exports_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            row(&[("Últimos 15 dias (4 arquivos)", "cmd:/exportar_15dias")]),
            row(&[
                ("Exportar Semana", "cmd:/exportar_semana"),
                ("Exportar Mês", "cmd:/exportar_mes"),
                ("Exportar Ano", "cmd:/exportar_ano"),
            ]),
            row(&[
                ("Ganhos 15d", "cmd:/exportar_ganhos_15dias"),
                ("Perdidos 15d", "cmd:/exportar_perdidos_15dias"),
            ]),
            row(&[
                ("Ativos 15d", "cmd:/exportar_ativos_15dias"),
                ("Follow-up 15d", "cmd:/exportar_perdidos_followup_15dias"),
            ]),
            row(&[("🔙 Voltar", "menu_main")]),
        ],
    }
}

pub fn menu(page: MenuPage) -> (&'static str, InlineKeyboardMarkup) {
    match page {
        MenuPage::Main => ("📋 *Menu Principal*", main_menu()),
        MenuPage::Reports => ("📊 *Relatórios*\nEscolha o período:", reports_menu()),
        MenuPage::Exports => ("📥 *Exportações (CSV)*\nEscolha o que exportar:", exports_menu()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_command() {
        assert_eq!(normalize_command("  /Semana  "), "/semana");
        assert_eq!(normalize_command("/mes@KommoBot"), "/mes");
        assert_eq!(normalize_command("/ano extra words"), "/ano");
        assert_eq!(normalize_command(""), "");
    }

    #[test]
    fn test_report_commands() {
        assert_eq!(resolve_command("/semana"), Some(Command::Report(ReportKind::Weekly)));
        assert_eq!(
            resolve_command("/ultimo_mes"),
            Some(Command::Report(ReportKind::LastMonth))
        );
        assert_eq!(
            resolve_command("/ANOPASSADO"),
            Some(Command::Report(ReportKind::LastYear))
        );
        assert_eq!(resolve_command("/start"), Some(Command::Help));
        assert_eq!(resolve_command("/menu"), Some(Command::Menu));
        assert_eq!(resolve_command("hello"), None);
    }

    #[test]
    fn test_export_commands() {
        assert_eq!(
            resolve_command("/exportar"),
            Some(Command::Export(ExportRequest {
                scope: ExportScope::All,
                period: ExportPeriod::All
            }))
        );
        assert_eq!(
            resolve_command("/exportar_15dias"),
            Some(Command::Export(ExportRequest {
                scope: ExportScope::All,
                period: ExportPeriod::Last15Days
            }))
        );
        assert_eq!(
            resolve_command("/exportar_perdidos_followup_mes"),
            Some(Command::Export(ExportRequest {
                scope: ExportScope::Only(ExportCategory::LostFollowup),
                period: ExportPeriod::Report(ReportKind::CurrentMonth)
            }))
        );
        assert_eq!(
            resolve_command("/exportar_perdidos"),
            Some(Command::Export(ExportRequest {
                scope: ExportScope::Only(ExportCategory::Lost),
                period: ExportPeriod::All
            }))
        );
        assert_eq!(resolve_command("/exportar_ganhos_decada"), None);
        assert_eq!(resolve_command("/exportarx"), None);
    }

    #[test]
    fn test_every_help_command_resolves() {
        let help = help_message();
        let commands: Vec<&str> = help
            .split_whitespace()
            .filter(|w| w.starts_with('/'))
            .collect();
        assert!(commands.len() > 30);
        for cmd in commands {
            assert!(resolve_command(cmd).is_some(), "unresolved help command {}", cmd);
        }
    }

    #[test]
    fn test_export_command_text_round_trips() {
        let request = ExportRequest {
            scope: ExportScope::Only(ExportCategory::Active),
            period: ExportPeriod::Report(ReportKind::LastWeek),
        };
        let text = export_command_text(&request);
        assert_eq!(text, "/exportar_ativos_semanapassada");
        assert_eq!(resolve_command(&text), Some(Command::Export(request)));
    }

    #[test]
    fn test_every_menu_button_is_actionable() {
        for markup in [main_menu(), reports_menu(), exports_menu()] {
            for button in markup.inline_keyboard.iter().flatten() {
                match resolve_callback(&button.callback_data) {
                    Some(CallbackAction::Run(cmd)) => assert!(resolve_command(&cmd).is_some()),
                    Some(CallbackAction::Show(_)) => {}
                    None => panic!("dead button {}", button.callback_data),
                }
            }
        }
    }
}

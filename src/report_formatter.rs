//! Telegram Markdown renderings of aggregation results.
//!
//! All functions are pure: the same input always produces the same bytes.

use crate::analytics::{
    conversion_rate, fmt_decimal, percentage, AggregationResult, OriginEfficiency,
};
use crate::models::PeriodWindow;
use chrono::{Datelike, TimeZone};
use chrono_tz::Tz;

pub const MESES_PT: [&str; 12] = [
    "Janeiro", "Fevereiro", "Março", "Abril", "Maio", "Junho", "Julho", "Agosto", "Setembro",
    "Outubro", "Novembro", "Dezembro",
];

const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━";
const FOOTER: &str = "━━━━━━━━━━━━━━━━━━━━\n_Atualizado em análise automática_ ⚙️";

/// Who and when a report is about.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub client_name: String,
    pub period_label: String,
    pub window: PeriodWindow,
    pub tz: Tz,
}

impl ReportContext {
    fn month_name(&self) -> &'static str {
        self.tz
            .timestamp_opt(self.window.start, 0)
            .single()
            .map(|dt| MESES_PT[dt.month0() as usize])
            .unwrap_or("")
    }

    fn year(&self) -> i32 {
        self.tz
            .timestamp_opt(self.window.start, 0)
            .single()
            .map(|dt| dt.year())
            .unwrap_or_default()
    }
}

pub fn month_name(month: u32) -> &'static str {
    MESES_PT
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("")
}

pub fn compose_weekly(result: &AggregationResult, ctx: &ReportContext) -> String {
    let mut msg = format!(
        "💎 Cliente: {client}\n\
         📅 Relatório Semanal\n\
         {DIVIDER}\n\n\
         📅 *Período*\n\
         {period}\n\n\
         📥 *Entrada (Leads Novos)*\n\
         ├ Criados: *{created}*\n\
         └ ⚡ Leads Novos Fechados: *{cohort}*\n\n\
         🏆 *Resultado (Ganhos Totais)*\n\
         ├ Vendas Fechadas: *{volume}*\n\
         └ 📈 Taxa de Conversão: *{conversion}%*\n\n\
         📐 *Relação Leads/Venda*\n\
         └ *{ratio}* leads por 1 venda\n\n",
        client = ctx.client_name.to_uppercase(),
        period = ctx.period_label,
        created = result.total_created,
        cohort = result.cohort_won,
        volume = result.total_closed_won,
        conversion = fmt_decimal(conversion_rate(result)),
        ratio = result.ratio,
    );

    if !result.origins.is_empty() {
        msg.push_str("🌍 *Origens (Total: 100%)*\n");
        for (idx, (origin, count)) in result.origins.iter().enumerate() {
            msg.push_str(&format!(
                "{}. {}: *{}* ({}%)\n",
                idx + 1,
                origin,
                count,
                fmt_decimal(percentage(*count, result.total_created))
            ));
        }
        msg.push('\n');
    }

    msg.push_str(FOOTER);
    msg
}

/// Monthly close: funnel split into this month's and older wins, plus
/// per-origin performance rows.
pub fn compose_monthly(
    result: &AggregationResult,
    efficiency_rows: &[OriginEfficiency],
    total_lost: usize,
    ctx: &ReportContext,
) -> String {
    let older_won = result.total_closed_won.saturating_sub(result.cohort_won);

    let mut msg = format!(
        "🏆 Fechamento Mensal: {month}\n\
         💎 Cliente: {client}\n\
         {DIVIDER}\n\n\
         📅 *Período*\n\
         {period}\n\n\
         📊 *Funil de Vendas*\n\
         ├ Leads Novos: *{created}*\n\
         ├ Ganhos (Do mês): *{cohort}*\n\
         └ Ganhos (Antigos): *{older}*\n\n\
         💰 *Performance Total*\n\
         ├ Total de Vendas: *{volume}*\n\
         ├ 📐 Leads por Venda: *{ratio}*\n\
         └ 📉 Leads Perdidos: *{lost}*\n\n",
        month = ctx.month_name(),
        client = ctx.client_name.to_uppercase(),
        period = ctx.period_label,
        created = result.total_created,
        cohort = result.cohort_won,
        older = older_won,
        volume = result.total_closed_won,
        ratio = result.ratio,
        lost = total_lost,
    );

    msg.push_str("🌍 *Performance por Origem*\n");
    for row in efficiency_rows {
        msg.push_str(&format!(
            "- {}: [Leads: *{}*] | [Vendas: *{}*] | [*{}%*] | [Leads/Venda: *{}*]\n",
            row.label,
            row.count,
            row.won,
            fmt_decimal(percentage(row.won, row.count)),
            row.ratio
        ));
    }
    msg.push('\n');

    msg.push_str(FOOTER);
    msg
}

/// Yearly retrospective with the six best months.
pub fn compose_annual(
    result: &AggregationResult,
    sales_by_month: &[((i32, u32), usize)],
    ctx: &ReportContext,
) -> String {
    let mut msg = format!(
        "🎆 Retrospectiva Anual: {year}\n\
         💎 Cliente: {client}\n\
         {DIVIDER}\n\n\
         📅 *Período*\n\
         {period}\n\n\
         📈 *Números Globais*\n\
         ├ Leads Totais: *{created}*\n\
         ├ Vendas Totais: *{volume}*\n\
         └ 📐 Leads por Venda: *{ratio}*\n\n\
         🗓️ *Sazonalidade (Melhores Meses)*\n",
        year = ctx.year(),
        client = ctx.client_name.to_uppercase(),
        period = ctx.period_label,
        created = result.total_created,
        volume = result.total_closed_won,
        ratio = result.ratio,
    );

    for (idx, ((_, month), count)) in sales_by_month.iter().take(6).enumerate() {
        msg.push_str(&format!("{}. {}: *{}* vendas\n", idx + 1, month_name(*month), count));
    }
    msg.push('\n');

    msg.push_str("🌍 *Domínio de Mercado*\n");
    for (origin, count) in result.origins.iter() {
        msg.push_str(&format!(
            "- {}: *{}* ({}%)\n",
            origin,
            count,
            fmt_decimal(percentage(*count, result.total_created))
        ));
    }
    msg.push('\n');

    msg.push_str(FOOTER);
    msg
}

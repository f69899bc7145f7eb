//! Report kinds and the calendar windows they cover, in the report timezone.

use crate::models::PeriodWindow;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Sunday of this week until now.
    Weekly,
    /// Previous Sunday-to-Saturday week.
    LastWeek,
    CurrentMonth,
    LastMonth,
    YearToDate,
    LastYear,
}

/// Which message layout a report kind renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTemplate {
    Weekly,
    Monthly,
    Annual,
}

impl ReportKind {
    pub const ALL: [ReportKind; 6] = [
        ReportKind::Weekly,
        ReportKind::LastWeek,
        ReportKind::CurrentMonth,
        ReportKind::LastMonth,
        ReportKind::YearToDate,
        ReportKind::LastYear,
    ];

    /// Parses a report name, including the legacy aliases
    /// (`monthly` is the closed previous month, `annual` the previous year).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "weekly" | "week" => Some(ReportKind::Weekly),
            "last_week" => Some(ReportKind::LastWeek),
            "current_month" | "month_to_date" | "month" => Some(ReportKind::CurrentMonth),
            "last_month" | "monthly" => Some(ReportKind::LastMonth),
            "yearly" | "year_to_date" => Some(ReportKind::YearToDate),
            "last_year" | "annual" => Some(ReportKind::LastYear),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Weekly => "weekly",
            ReportKind::LastWeek => "last_week",
            ReportKind::CurrentMonth => "current_month",
            ReportKind::LastMonth => "last_month",
            ReportKind::YearToDate => "year_to_date",
            ReportKind::LastYear => "last_year",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::Weekly => "Semana Atual (Dom - Hoje)",
            ReportKind::LastWeek => "Semana Passada (Dom - Sáb)",
            ReportKind::CurrentMonth => "Mês Atual (Até hoje)",
            ReportKind::LastMonth => "Mês Anterior (Fechado)",
            ReportKind::YearToDate => "Ano Atual (Até hoje)",
            ReportKind::LastYear => "Ano Anterior (Retrospectiva)",
        }
    }

    pub fn template(&self) -> ReportTemplate {
        match self {
            ReportKind::Weekly | ReportKind::LastWeek => ReportTemplate::Weekly,
            ReportKind::CurrentMonth | ReportKind::LastMonth => ReportTemplate::Monthly,
            ReportKind::YearToDate | ReportKind::LastYear => ReportTemplate::Annual,
        }
    }

    /// Half-open window for this report as seen at `now`.
    ///
    /// "Until now" windows end one second after `now` so the current second counts.
    pub fn window(&self, now: DateTime<Tz>) -> PeriodWindow {
        let tz = now.timezone();
        let today = now.date_naive();
        let until_now = now.timestamp() + 1;

        match self {
            ReportKind::Weekly => {
                let sunday = week_start(today);
                PeriodWindow::new(local_midnight(tz, sunday), until_now)
            }
            ReportKind::LastWeek => {
                let sunday = week_start(today);
                let previous = sunday - Duration::days(7);
                PeriodWindow::new(local_midnight(tz, previous), local_midnight(tz, sunday))
            }
            ReportKind::CurrentMonth => {
                PeriodWindow::new(local_midnight(tz, month_start(today)), until_now)
            }
            ReportKind::LastMonth => {
                let this_month = month_start(today);
                let last_month = month_start(this_month - Duration::days(1));
                PeriodWindow::new(local_midnight(tz, last_month), local_midnight(tz, this_month))
            }
            ReportKind::YearToDate => {
                PeriodWindow::new(local_midnight(tz, year_start(today.year())), until_now)
            }
            ReportKind::LastYear => PeriodWindow::new(
                local_midnight(tz, year_start(today.year() - 1)),
                local_midnight(tz, year_start(today.year())),
            ),
        }
    }
}

/// Export windows selectable from chat commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPeriod {
    /// Full history, no window filter.
    All,
    Last15Days,
    Report(ReportKind),
}

impl ExportPeriod {
    pub fn window(&self, now: DateTime<Tz>) -> Option<PeriodWindow> {
        match self {
            ExportPeriod::All => None,
            ExportPeriod::Last15Days => Some(PeriodWindow::new(
                (now - Duration::days(15)).timestamp(),
                now.timestamp() + 1,
            )),
            ExportPeriod::Report(kind) => Some(kind.window(now)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExportPeriod::All => "Histórico Completo",
            ExportPeriod::Last15Days => "Últimos 15 dias",
            ExportPeriod::Report(ReportKind::Weekly) => "Semana Atual",
            ExportPeriod::Report(ReportKind::LastWeek) => "Semana Passada",
            ExportPeriod::Report(ReportKind::CurrentMonth) => "Mês Atual",
            ExportPeriod::Report(ReportKind::LastMonth) => "Mês Anterior",
            ExportPeriod::Report(ReportKind::YearToDate) => "Ano Atual",
            ExportPeriod::Report(ReportKind::LastYear) => "Ano Anterior",
        }
    }
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_sunday() as i64)
}

fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn year_start(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default()
}

/// Epoch of the first instant of `day` in `tz`.
///
/// Days whose midnight falls in a DST gap start at the first valid local hour.
pub fn local_midnight(tz: Tz, day: NaiveDate) -> i64 {
    (0..24)
        .filter_map(|hour| day.and_hms_opt(hour, 0, 0))
        .find_map(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sao_paulo(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();
        tz.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(ReportKind::parse("monthly"), Some(ReportKind::LastMonth));
        assert_eq!(ReportKind::parse("annual"), Some(ReportKind::LastYear));
        assert_eq!(ReportKind::parse("month"), Some(ReportKind::CurrentMonth));
        assert_eq!(ReportKind::parse(" Weekly "), Some(ReportKind::Weekly));
        assert_eq!(ReportKind::parse("quarterly"), None);
        for kind in ReportKind::ALL {
            assert_eq!(ReportKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_weekly_starts_on_sunday() {
        // Wednesday 2024-05-15 14:30
        let now = sao_paulo(2024, 5, 15, 14, 30);
        let w = ReportKind::Weekly.window(now);
        assert_eq!(w.start, sao_paulo(2024, 5, 12, 0, 0).timestamp());
        assert_eq!(w.end, now.timestamp() + 1);
        assert!(w.contains(now.timestamp()));
    }

    #[test]
    fn test_weekly_on_sunday_starts_today() {
        let now = sao_paulo(2024, 5, 12, 8, 0);
        let w = ReportKind::Weekly.window(now);
        assert_eq!(w.start, sao_paulo(2024, 5, 12, 0, 0).timestamp());
    }

    #[test]
    fn test_last_week_is_sunday_to_saturday() {
        let now = sao_paulo(2024, 5, 15, 14, 30);
        let w = ReportKind::LastWeek.window(now);
        assert_eq!(w.start, sao_paulo(2024, 5, 5, 0, 0).timestamp());
        assert_eq!(w.end, sao_paulo(2024, 5, 12, 0, 0).timestamp());
        assert_eq!(w.last_second(), sao_paulo(2024, 5, 11, 23, 59).timestamp() + 59);
    }

    #[test]
    fn test_last_month_crosses_year() {
        let now = sao_paulo(2024, 1, 10, 9, 0);
        let w = ReportKind::LastMonth.window(now);
        assert_eq!(w.start, sao_paulo(2023, 12, 1, 0, 0).timestamp());
        assert_eq!(w.end, sao_paulo(2024, 1, 1, 0, 0).timestamp());
    }

    #[test]
    fn test_year_windows() {
        let now = sao_paulo(2024, 7, 1, 12, 0);
        let ytd = ReportKind::YearToDate.window(now);
        assert_eq!(ytd.start, sao_paulo(2024, 1, 1, 0, 0).timestamp());
        let last = ReportKind::LastYear.window(now);
        assert_eq!(last.start, sao_paulo(2023, 1, 1, 0, 0).timestamp());
        assert_eq!(last.end, ytd.start);
    }

    #[test]
    fn test_export_periods() {
        let now = sao_paulo(2024, 7, 1, 12, 0);
        assert_eq!(ExportPeriod::All.window(now), None);
        let w = ExportPeriod::Last15Days.window(now).unwrap();
        assert_eq!(w.end - w.start, 15 * 86_400 + 1);
        assert_eq!(ExportPeriod::Report(ReportKind::LastMonth).label(), "Mês Anterior");
    }
}

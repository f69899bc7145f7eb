//! Lead exports: partition by outcome, resolve contacts and write each
//! category as an Excel workbook plus a CSV.

use crate::client_config::ClientConfig;
use crate::contact_format::{first_valid_email, first_valid_phone};
use crate::errors::{AppError, ResultExt};
use crate::field_extractor::extract_optional_field_value;
use crate::kommo_client::KommoClient;
use crate::lead_fetcher::{dedup_by_id, fetch_created, fetch_followup};
use crate::models::{CanonicalId, Contact, ContactId, Lead, PeriodWindow};
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

const UTF8_BOM: &str = "\u{feff}";

pub const CSV_HEADER: [&str; 9] = [
    "ID",
    "Nome",
    "Telefone",
    "E-mail",
    "Valor",
    "Status",
    "Responsável",
    "Criado em",
    "Atualizado em",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportCategory {
    Won,
    Lost,
    LostFollowup,
    Active,
}

impl ExportCategory {
    pub const ALL: [ExportCategory; 4] = [
        ExportCategory::Won,
        ExportCategory::Lost,
        ExportCategory::LostFollowup,
        ExportCategory::Active,
    ];

    /// File-name and command slug.
    pub fn slug(&self) -> &'static str {
        match self {
            ExportCategory::Won => "ganhos",
            ExportCategory::Lost => "perdidos",
            ExportCategory::LostFollowup => "perdidos_followup",
            ExportCategory::Active => "ativos",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ExportCategory::Won => "Ganhos",
            ExportCategory::Lost => "Perdidos",
            ExportCategory::LostFollowup => "Perdidos Followup",
            ExportCategory::Active => "Ativos",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.slug() == slug)
    }

    /// Policy used when the client config names none for this category.
    pub fn default_policy(&self) -> ContactPolicy {
        match self {
            ExportCategory::Won | ExportCategory::Active => ContactPolicy::LeadFallback,
            ExportCategory::Lost | ExportCategory::LostFollowup => ContactPolicy::RequireContact,
        }
    }
}

/// What to do with a lead whose contact data does not validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPolicy {
    /// Drop rows without a name and a validated phone or email.
    RequireContact,
    /// Keep every row; the lead's own name stands in and missing contacts are blank.
    LeadFallback,
}

/// Main-pipeline leads split by outcome. Each lead is in exactly one bucket.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub won: Vec<Lead>,
    pub lost: Vec<Lead>,
    pub active: Vec<Lead>,
}

pub fn partition(leads: Vec<Lead>, won_status: &CanonicalId, lost_status: &CanonicalId) -> Partition {
    let mut out = Partition::default();
    for lead in dedup_by_id(leads) {
        if lead.has_status(won_status) {
            out.won.push(lead);
        } else if lead.has_status(lost_status) {
            out.lost.push(lead);
        } else {
            out.active.push(lead);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub price: String,
    pub status: String,
    pub responsible: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ExportRow {
    fn fields(&self) -> [&str; 8] {
        [
            &self.name,
            &self.phone,
            &self.email,
            &self.price,
            &self.status,
            &self.responsible,
            &self.created_at,
            &self.updated_at,
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportTable {
    pub category: ExportCategory,
    pub rows: Vec<ExportRow>,
    /// Leads left out by [`ContactPolicy::RequireContact`].
    pub dropped: usize,
}

/// Tables keyed by category, in category order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportBundle(pub BTreeMap<ExportCategory, ExportTable>);

impl ExportBundle {
    pub fn get(&self, category: ExportCategory) -> Option<&ExportTable> {
        self.0.get(&category)
    }

    pub fn tables(&self) -> impl Iterator<Item = &ExportTable> {
        self.0.values()
    }
}

/// Field ids used to read contact data embedded in the lead itself.
#[derive(Debug, Clone, Default)]
pub struct LeadContactFields {
    pub phone_field_id: Option<CanonicalId>,
    pub email_field_id: Option<CanonicalId>,
}

fn format_timestamp(ts: Option<i64>, tz: Tz) -> String {
    ts.and_then(|t| tz.timestamp_opt(t, 0).single())
        .map(|dt: DateTime<Tz>| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn format_price(price: Option<f64>) -> String {
    format!("{}", price.unwrap_or(0.0))
}

/// Builds one row, or `None` when `policy` rejects the lead.
///
/// Contact values come first, then the lead's own fields; the first candidate
/// that validates wins.
pub fn build_row(
    lead: &Lead,
    contact: Option<&Contact>,
    fields: &LeadContactFields,
    policy: ContactPolicy,
    tz: Tz,
) -> Option<ExportRow> {
    let mut phones: Vec<String> = contact.map(|c| c.phones()).unwrap_or_default();
    let mut emails: Vec<String> = contact.map(|c| c.emails()).unwrap_or_default();
    if let Some(ref id) = fields.phone_field_id {
        phones.extend(extract_optional_field_value(lead, id));
    }
    if let Some(ref id) = fields.email_field_id {
        emails.extend(extract_optional_field_value(lead, id));
    }

    let phone = first_valid_phone(&phones);
    let email = first_valid_email(&emails);

    let contact_name = contact.map(|c| c.display_name()).unwrap_or("");
    let name = if contact_name.is_empty() {
        lead.display_name()
    } else {
        contact_name
    };

    if policy == ContactPolicy::RequireContact
        && (name.is_empty() || (phone.is_empty() && email.is_empty()))
    {
        return None;
    }

    Some(ExportRow {
        id: lead.id,
        name: name.to_string(),
        phone,
        email,
        price: format_price(lead.price),
        status: lead
            .status_id
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        responsible: lead
            .responsible_user_id
            .map(|r| r.to_string())
            .unwrap_or_default(),
        created_at: format_timestamp(lead.created_at, tz),
        updated_at: format_timestamp(lead.updated_at, tz),
    })
}

pub fn build_table(
    category: ExportCategory,
    leads: &[Lead],
    contacts: &HashMap<ContactId, Contact>,
    fields: &LeadContactFields,
    policy: ContactPolicy,
    tz: Tz,
) -> ExportTable {
    let mut rows = Vec::with_capacity(leads.len());
    let mut dropped = 0;
    for lead in leads {
        let contact = lead.first_contact_id().and_then(|id| contacts.get(&id));
        match build_row(lead, contact, fields, policy, tz) {
            Some(row) => rows.push(row),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(
            "Export {}: {} rows kept, {} dropped without contact",
            category.slug(),
            rows.len(),
            dropped
        );
    }
    ExportTable {
        category,
        rows,
        dropped,
    }
}

/// Fetches, partitions and tabulates the requested categories for one client.
pub async fn generate_exports(
    kommo: &KommoClient,
    config: &ClientConfig,
    window: Option<PeriodWindow>,
    categories: &[ExportCategory],
    tz: Tz,
) -> ExportBundle {
    let settings = &config.kommo;
    tracing::info!(
        "📁 Generating exports for {} ({} categories)",
        config.client_id,
        categories.len()
    );

    let main = fetch_created(kommo, &settings.pipeline_id, window).await;
    let Partition { won, lost, active } =
        partition(main, &settings.won_status_id, &settings.lost_status_id);

    let lost_followup: Vec<Lead> = if categories.contains(&ExportCategory::LostFollowup) {
        fetch_followup(kommo, &settings.followup_pipeline_ids, window)
            .await
            .into_iter()
            .filter(|l| l.has_status(&settings.lost_status_id))
            .collect()
    } else {
        Vec::new()
    };

    let mut selected: Vec<(ExportCategory, Vec<Lead>)> = Vec::new();
    for (category, leads) in [
        (ExportCategory::Won, won),
        (ExportCategory::Lost, lost),
        (ExportCategory::LostFollowup, lost_followup),
        (ExportCategory::Active, active),
    ] {
        if categories.contains(&category) {
            selected.push((category, leads));
        }
    }

    let contact_ids: Vec<ContactId> = selected
        .iter()
        .flat_map(|(_, leads)| leads.iter().filter_map(|l| l.first_contact_id()))
        .collect();
    let contacts = kommo.get_contacts(&contact_ids).await;

    let fields = LeadContactFields {
        phone_field_id: settings.phone_field_id.clone(),
        email_field_id: settings.email_field_id.clone(),
    };

    let mut bundle = ExportBundle::default();
    for (category, leads) in selected {
        let policy = config.exports.policy_for(category);
        let table = build_table(category, &leads, &contacts, &fields, policy, tz);
        bundle.0.insert(category, table);
    }

    tracing::info!(
        "✅ Exports for {}: {}",
        config.client_id,
        bundle
            .tables()
            .map(|t| format!("{} {}", t.rows.len(), t.category.slug()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    bundle
}

fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Writes `table` as UTF-8 CSV with a BOM so spreadsheet tools detect the encoding.
pub fn write_csv(table: &ExportTable, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Creating export dir {}", parent.display()))?;
    }

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Creating export file {}", path.display()))?;

    let header: Vec<String> = CSV_HEADER.iter().map(|h| csv_field(h)).collect();
    write!(file, "{}", UTF8_BOM).context("Writing CSV BOM")?;
    writeln!(file, "{}", header.join(",")).context("Writing CSV header")?;

    for row in &table.rows {
        let cells: Vec<String> = std::iter::once(row.id.to_string())
            .chain(row.fields().iter().map(|f| csv_field(f)))
            .collect();
        writeln!(file, "{}", cells.join(","))
            .with_context(|| format!("Writing row {} to {}", row.id, path.display()))?;
    }

    Ok(())
}

/// Writes `table` as a single-sheet workbook named after the category.
pub fn write_xlsx(table: &ExportTable, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Creating export dir {}", parent.display()))?;
    }

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(table.category.title())?;

    for (col, title) in (0u16..).zip(CSV_HEADER.iter()) {
        sheet.write_string_with_format(0, col, *title, &bold)?;
    }
    for (row_idx, row) in (1u32..).zip(table.rows.iter()) {
        sheet.write_number(row_idx, 0, row.id as f64)?;
        for (col, value) in (1u16..).zip(row.fields().iter()) {
            sheet.write_string(row_idx, col, *value)?;
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Saving workbook {}", path.display()))
}

/// File flavours written for every category, in upload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Excel,
    Csv,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Excel, ExportFormat::Csv];

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Excel => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    /// Caption suffix shown in the chat.
    pub fn label(&self) -> &'static str {
        match self {
            ExportFormat::Excel => "Excel",
            ExportFormat::Csv => "CSV",
        }
    }

    fn write(&self, table: &ExportTable, path: &Path) -> Result<(), AppError> {
        match self {
            ExportFormat::Excel => write_xlsx(table, path),
            ExportFormat::Csv => write_csv(table, path),
        }
    }
}

/// One file produced by [`write_bundle`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub category: ExportCategory,
    pub format: ExportFormat,
    pub path: PathBuf,
}

/// `{exports_dir}/{client}/{client}_{slug}_{YYYYmmdd_HHMMSS}.{ext}`
pub fn export_path(
    exports_dir: &Path,
    client_id: &str,
    category: ExportCategory,
    stamp: &str,
    format: ExportFormat,
) -> PathBuf {
    exports_dir.join(client_id).join(format!(
        "{}_{}_{}.{}",
        client_id,
        category.slug(),
        stamp,
        format.extension()
    ))
}

/// Materializes every table of `bundle` in both formats, in category order
/// with the workbook before the CSV.
pub fn write_bundle(
    bundle: &ExportBundle,
    exports_dir: &Path,
    client_id: &str,
    now: DateTime<Tz>,
) -> Result<Vec<ExportFile>, AppError> {
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let mut written = Vec::new();
    for table in bundle.tables() {
        for format in ExportFormat::ALL {
            let path = export_path(exports_dir, client_id, table.category, &stamp, format);
            format.write(table, &path)?;
            tracing::debug!("Wrote {} rows to {}", table.rows.len(), path.display());
            written.push(ExportFile {
                category: table.category,
                format,
                path,
            });
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tz() -> Tz {
        "America/Sao_Paulo".parse().unwrap()
    }

    fn lead(id: i64, status: i64) -> Lead {
        Lead::from_value(json!({"id": id, "name": format!("Lead {}", id), "status_id": status}))
            .unwrap()
    }

    #[test]
    fn test_partition_is_exclusive() {
        let leads = vec![lead(1, 142), lead(2, 143), lead(3, 50), lead(1, 142), lead(4, 142)];
        let p = partition(leads, &CanonicalId::from(142), &CanonicalId::from("143"));
        let ids = |v: &[Lead]| v.iter().map(|l| l.id).collect::<Vec<_>>();
        assert_eq!(ids(&p.won), vec![1, 4]);
        assert_eq!(ids(&p.lost), vec![2]);
        assert_eq!(ids(&p.active), vec![3]);
    }

    #[test]
    fn test_category_slugs_and_defaults() {
        assert_eq!(ExportCategory::from_slug("perdidos_followup"), Some(ExportCategory::LostFollowup));
        assert_eq!(ExportCategory::from_slug("nada"), None);
        assert_eq!(ExportCategory::Lost.default_policy(), ContactPolicy::RequireContact);
        assert_eq!(ExportCategory::Won.default_policy(), ContactPolicy::LeadFallback);
        let parsed: ContactPolicy = serde_json::from_value(json!("lead_fallback")).unwrap();
        assert_eq!(parsed, ContactPolicy::LeadFallback);
    }

    fn contact(phone: &str) -> Contact {
        serde_json::from_value(json!({
            "id": 9,
            "name": "Maria Souza",
            "custom_fields_values": [{"field_code": "PHONE", "values": [{"value": phone}]}]
        }))
        .unwrap()
    }

    #[test]
    fn test_contact_phone_preferred_over_lead_field() {
        let l = Lead::from_value(json!({
            "id": 1,
            "name": "Lead name",
            "custom_fields_values": [{"field_id": 77, "values": [{"value": "(21) 99999-0000"}]}]
        }))
        .unwrap();
        let fields = LeadContactFields {
            phone_field_id: Some(CanonicalId::from(77)),
            email_field_id: None,
        };
        let c = contact("(11) 98765-4321");
        let row = build_row(&l, Some(&c), &fields, ContactPolicy::RequireContact, tz()).unwrap();
        assert_eq!(row.phone, "+5511987654321");
        assert_eq!(row.name, "Maria Souza");

        let invalid = contact("123");
        let row = build_row(&l, Some(&invalid), &fields, ContactPolicy::RequireContact, tz()).unwrap();
        assert_eq!(row.phone, "+5521999990000");
    }

    #[test]
    fn test_require_contact_drops_and_fallback_keeps() {
        let l = lead(1, 143);
        let fields = LeadContactFields::default();
        assert!(build_row(&l, None, &fields, ContactPolicy::RequireContact, tz()).is_none());

        let row = build_row(&l, None, &fields, ContactPolicy::LeadFallback, tz()).unwrap();
        assert_eq!(row.name, "Lead 1");
        assert_eq!(row.phone, "");
        assert_eq!(row.email, "");

        let table = build_table(
            ExportCategory::Lost,
            &[lead(1, 143), lead(2, 143)],
            &HashMap::new(),
            &fields,
            ContactPolicy::RequireContact,
            tz(),
        );
        assert!(table.rows.is_empty());
        assert_eq!(table.dropped, 2);
    }

    #[test]
    fn test_row_formatting() {
        let l = Lead::from_value(json!({
            "id": 5,
            "name": "Apto",
            "price": 350000,
            "status_id": 142,
            "responsible_user_id": 42,
            "created_at": 1700000000
        }))
        .unwrap();
        let row = build_row(&l, None, &LeadContactFields::default(), ContactPolicy::LeadFallback, tz()).unwrap();
        assert_eq!(row.price, "350000");
        assert_eq!(row.status, "142");
        assert_eq!(row.responsible, "42");
        assert_eq!(row.created_at, "2023-11-14 19:13:20");
        assert_eq!(row.updated_at, "");
    }

    #[test]
    fn test_write_bundle_layout_and_bom() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = ExportBundle::default();
        bundle.0.insert(
            ExportCategory::Active,
            ExportTable {
                category: ExportCategory::Active,
                rows: vec![ExportRow {
                    id: 1,
                    name: "Silva, João \"JJ\"".to_string(),
                    phone: String::new(),
                    email: String::new(),
                    price: "0".to_string(),
                    status: "50".to_string(),
                    responsible: String::new(),
                    created_at: String::new(),
                    updated_at: String::new(),
                }],
                dropped: 0,
            },
        );
        bundle.0.insert(
            ExportCategory::Won,
            ExportTable {
                category: ExportCategory::Won,
                rows: vec![],
                dropped: 0,
            },
        );

        let now = tz().with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let written = write_bundle(&bundle, dir.path(), "acme", now).unwrap();
        assert_eq!(written.len(), 4);
        let layout: Vec<(ExportCategory, ExportFormat)> =
            written.iter().map(|f| (f.category, f.format)).collect();
        assert_eq!(
            layout,
            vec![
                (ExportCategory::Won, ExportFormat::Excel),
                (ExportCategory::Won, ExportFormat::Csv),
                (ExportCategory::Active, ExportFormat::Excel),
                (ExportCategory::Active, ExportFormat::Csv),
            ]
        );
        assert!(written[0].path.ends_with("acme/acme_ganhos_20240301_090507.xlsx"));
        assert!(written[1].path.ends_with("acme/acme_ganhos_20240301_090507.csv"));

        let active = std::fs::read_to_string(&written[3].path).unwrap();
        assert!(active.starts_with('\u{feff}'));
        let mut lines = active.trim_start_matches('\u{feff}').lines();
        assert_eq!(
            lines.next(),
            Some("ID,Nome,Telefone,E-mail,Valor,Status,Responsável,Criado em,Atualizado em")
        );
        assert_eq!(lines.next(), Some("1,\"Silva, João \"\"JJ\"\"\",,,0,50,,,"));

        let won = std::fs::read_to_string(&written[1].path).unwrap();
        assert_eq!(won.lines().count(), 1);

        // xlsx is a zip container
        let workbook = std::fs::read(&written[2].path).unwrap();
        assert!(workbook.starts_with(b"PK"));
    }
}

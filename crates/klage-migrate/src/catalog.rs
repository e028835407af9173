//! The compiled-in catalog of the case management tables.
//!
//! New columns are added here and ship with a bumped [`DECLARED_VERSION`];
//! the next reconciliation adds them to existing installations.

use klage_db_schema::{ColumnSpec, ConfigurationError, SchemaCatalog, SqlType, TableSchema};

/// Version of the catalog below. Bump on every change.
pub const DECLARED_VERSION: &str = "1.4.8";

fn varchar(name: &str, len: u32) -> ColumnSpec {
    ColumnSpec::new(name, SqlType::Varchar(len))
}

fn varchar_default(name: &str, len: u32, default: &str) -> ColumnSpec {
    varchar(name, len).default_text(default)
}

fn text(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, SqlType::Text)
}

fn date(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, SqlType::Date)
}

fn bigint(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, SqlType::BigInt)
}

fn money(name: &str, default: &str) -> ColumnSpec {
    ColumnSpec::new(
        name,
        SqlType::Numeric {
            precision: 10,
            scale: 2,
        },
    )
    .default_number(default)
}

fn flag(name: &str, default: &str) -> ColumnSpec {
    ColumnSpec::new(name, SqlType::SmallInt).default_number(default)
}

fn id() -> ColumnSpec {
    ColumnSpec::new("id", SqlType::BigSerial).not_null()
}

fn created_at() -> ColumnSpec {
    ColumnSpec::new("created_at", SqlType::Timestamp).default_expr("CURRENT_TIMESTAMP")
}

fn updated_at() -> ColumnSpec {
    ColumnSpec::new("updated_at", SqlType::Timestamp).default_expr("CURRENT_TIMESTAMP")
}

fn cases() -> TableSchema {
    TableSchema::new("klage_cases")
        .column(id())
        .column(varchar_default("case_id", 100, "").not_null())
        .column(
            ColumnSpec::new("case_creation_date", SqlType::Timestamp)
                .not_null()
                .default_expr("CURRENT_TIMESTAMP"),
        )
        .column(ColumnSpec::new("case_updated_date", SqlType::Timestamp))
        .column(varchar_default("case_status", 20, "draft"))
        .column(varchar_default("case_priority", 20, "medium"))
        .column(text("case_notes"))
        .column(varchar_default("brief_status", 20, "pending"))
        .column(date("submission_date"))
        .column(varchar("mandant", 100))
        .column(bigint("client_id"))
        .column(bigint("debtor_id"))
        .column(money("total_amount", "0.00"))
        .column(bigint("court_id"))
        .column(varchar("import_source", 50))
        .column(ColumnSpec::new("briefe", SqlType::Integer).default_number("1"))
        .column(varchar("schuldner", 200))
        .column(text("beweise"))
        .column(text("dokumente"))
        .column(text("links_zu_dokumenten"))
        .column(varchar_default("verfahrensart", 50, "mahnverfahren"))
        .column(varchar_default("rechtsgrundlage", 100, "DSGVO Art. 82"))
        .column(date("zeitraum_von"))
        .column(date("zeitraum_bis"))
        .column(ColumnSpec::new("anzahl_verstoesse", SqlType::Integer).default_number("1"))
        .column(money("schadenhoehe", "548.11"))
        .column(varchar_default("anwaltsschreiben_status", 20, "pending"))
        .column(varchar_default("mahnung_status", 20, "pending"))
        .column(varchar_default("klage_status", 20, "pending"))
        .column(varchar_default("vollstreckung_status", 20, "pending"))
        .column(varchar("egvp_aktenzeichen", 50))
        .column(varchar("xjustiz_uuid", 100))
        .column(varchar("gericht_zustaendig", 100))
        .column(money("verfahrenswert", "548.11"))
        .column(date("deadline_antwort"))
        .column(date("deadline_zahlung"))
        .column(date("mahnung_datum"))
        .column(date("klage_datum"))
        .column(varchar_default("erfolgsaussicht", 20, "hoch"))
        .column(varchar_default("risiko_bewertung", 20, "niedrig"))
        .column(varchar_default("komplexitaet", 20, "standard"))
        .column(varchar_default("kommunikation_sprache", 5, "de"))
        .column(varchar_default("bevorzugter_kontakt", 20, "email"))
        .column(varchar_default("kategorie", 50, "GDPR_SPAM"))
        .column(varchar_default("prioritaet_intern", 20, "medium"))
        .column(varchar_default("bearbeitungsstatus", 20, "neu"))
        .column(date("case_deadline_response"))
        .column(date("case_deadline_payment"))
        .column(varchar_default("processing_complexity", 20, "standard"))
        .column(
            ColumnSpec::new(
                "processing_risk_score",
                SqlType::Numeric {
                    precision: 3,
                    scale: 2,
                },
            )
            .default_number("0.50"),
        )
        .column(varchar_default("document_type", 50, "email"))
        .column(varchar_default("document_language", 5, "de"))
        .column(created_at())
        .column(updated_at())
        .primary_key(&["id"])
        .unique(&["case_id"])
        .index(&["case_status"])
        .index(&["debtor_id"])
        .index(&["submission_date"])
}

fn debtors() -> TableSchema {
    TableSchema::new("klage_debtors")
        .column(id())
        .column(varchar_default("debtors_name", 200, "").not_null())
        .column(varchar("debtors_company", 200))
        .column(varchar("debtors_first_name", 100))
        .column(varchar("debtors_last_name", 100))
        .column(varchar("debtors_email", 255))
        .column(varchar("debtors_phone", 50))
        .column(varchar("debtors_fax", 50))
        .column(varchar("debtors_address", 200))
        .column(varchar("debtors_street", 150))
        .column(varchar("debtors_house_number", 20))
        .column(varchar("debtors_address_addition", 100))
        .column(varchar("debtors_postal_code", 20))
        .column(varchar("debtors_city", 100))
        .column(varchar("debtors_state", 100))
        .column(varchar_default("debtors_country", 100, "Deutschland"))
        .column(varchar_default("rechtsform", 50, "natuerliche_person"))
        .column(varchar("handelsregister_nr", 50))
        .column(varchar("ustid", 50))
        .column(varchar("geschaeftsfuehrer", 200))
        .column(varchar("website", 255))
        .column(text("social_media"))
        .column(varchar_default("finanzielle_situation", 50, "unbekannt"))
        .column(varchar_default("zahlungsverhalten", 20, "unbekannt"))
        .column(varchar_default("bonitaet", 20, "unbekannt"))
        .column(varchar_default("insolvenz_status", 20, "nein"))
        .column(varchar_default("pfaendung_status", 20, "nein"))
        .column(varchar_default("bevorzugte_sprache", 5, "de"))
        .column(flag("kommunikation_email", "1"))
        .column(flag("kommunikation_post", "1"))
        .column(varchar_default("datenquelle", 50, "manual"))
        .column(flag("verifiziert", "0"))
        .column(ColumnSpec::new("letzte_aktualisierung", SqlType::Timestamp))
        .column(created_at())
        .column(updated_at())
        .primary_key(&["id"])
        .index(&["debtors_name"])
        .index(&["debtors_email"])
        .index(&["debtors_postal_code"])
        .index(&["debtors_city"])
}

fn financial() -> TableSchema {
    TableSchema::new("klage_financial")
        .column(id())
        .column(bigint("case_id").not_null().default_number("0"))
        .column(money("damages_loss", "350.00"))
        .column(money("partner_fees", "96.90"))
        .column(money("communication_fees", "13.36"))
        .column(money("vat", "87.85"))
        .column(money("court_fees", "32.00"))
        .column(money("total", "548.11"))
        .column(money("streitwert", "548.11"))
        .column(money("schadenersatz", "350.00"))
        .column(money("anwaltskosten", "96.90"))
        .column(money("gerichtskosten", "32.00"))
        .column(money("nebenkosten", "13.36"))
        .column(money("auslagen", "0.00"))
        .column(money("mahnkosten", "0.00"))
        .column(money("vollstreckungskosten", "0.00"))
        .column(money("zinsen", "0.00"))
        .column(varchar_default("payment_status", 20, "offen"))
        .column(date("payment_date"))
        .column(money("payment_amount", "0.00"))
        .column(varchar("payment_method", 50))
        .column(varchar_default("kostenkategorie", 50, "GDPR_Standard"))
        .column(varchar_default("gebuehrenstruktur", 50, "RVG"))
        .column(text("custom_fields"))
        .column(bigint("calculation_template_id"))
        .column(created_at())
        .column(updated_at())
        .primary_key(&["id"])
        .index(&["case_id"])
        .index(&["payment_status"])
}

fn audit() -> TableSchema {
    TableSchema::new("klage_audit")
        .column(id())
        .column(bigint("case_id").not_null().default_number("0"))
        .column(varchar_default("action", 50, "").not_null())
        .column(text("details"))
        .column(bigint("user_id").not_null().default_number("0"))
        .column(created_at())
        .primary_key(&["id"])
        .index(&["case_id"])
        .index(&["action"])
        .index(&["user_id"])
}

/// The declared schema of the case management tables.
pub fn claims_catalog() -> Result<SchemaCatalog, ConfigurationError> {
    SchemaCatalog::new([cases(), debtors(), financial(), audit()])
}

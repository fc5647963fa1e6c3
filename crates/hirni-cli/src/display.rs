//! Vertical card display for specification records.
//!
//! Renders one record as a grouped, human-readable card. Approved values
//! carry a marker; empty entries are left out, as are empty sections.

use std::io::{self, Write};

use hirni_core::SpecRecord;
use hirni_core::schema::keys;

// ── Section groupings ──

const IDENTITY: &[&str] = &[
    keys::TYPE,
    keys::LOCATION,
    keys::UID,
    keys::DATASET_ID,
    keys::DATASET_REFCOMMIT,
];

const BIDS: &[&str] = &[
    keys::SUBJECT,
    keys::ANON_SUBJECT,
    keys::SESSION,
    keys::TASK,
    keys::RUN,
    keys::MODALITY,
    keys::ACQUISITION,
    keys::CONTRAST_ENHANCEMENT,
    keys::RECONSTRUCTION_ALGORITHM,
    keys::ECHO,
    keys::DIRECTION,
];

const CONVERSION: &[&str] = &[keys::CONVERTER, keys::CONVERTER_CONTAINER];

const NOTES: &[&str] = &[keys::ID, keys::DESCRIPTION, keys::COMMENT];

const SECTIONS: &[(&str, &[&str])] = &[
    ("Identity", IDENTITY),
    ("BIDS", BIDS),
    ("Conversion", CONVERSION),
    ("Notes", NOTES),
];

// ── Public API ──

/// Print a record as a vertical card grouped by section.
pub fn print_record_card(record: &SpecRecord) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_record_card(&mut out, record)?;
    Ok(())
}

pub fn write_record_card(out: &mut impl Write, record: &SpecRecord) -> io::Result<()> {
    writeln!(out, "=== {} {} ===", record.entity_type, record.identity_key())?;
    if let Some(description) = record.value_str(keys::DESCRIPTION) {
        writeln!(out, "{description}")?;
    }
    writeln!(out)?;

    for (header, cols) in SECTIONS {
        write_section(out, record, header, cols)?;
    }

    let listed = |key: &str| SECTIONS.iter().any(|(_, cols)| cols.contains(&key));
    let other: Vec<&str> = record
        .fields()
        .map(|(key, _)| key)
        .filter(|key| !listed(*key))
        .collect();
    write_section(out, record, "Other", &other)
}

// ── Section rendering ──

fn write_section(
    out: &mut impl Write,
    record: &SpecRecord,
    header: &str,
    cols: &[&str],
) -> io::Result<()> {
    let rows: Vec<(&str, String)> = cols
        .iter()
        .filter_map(|&key| Some((key, cell(record, key)?)))
        .collect();
    if rows.is_empty() {
        return Ok(());
    }

    writeln!(out, "{header}")?;
    for (key, value) in rows {
        writeln!(out, "  {:<26} {}", key, value)?;
    }
    writeln!(out)
}

fn cell(record: &SpecRecord, key: &str) -> Option<String> {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    match key {
        keys::TYPE => Some(record.entity_type.to_string()),
        keys::LOCATION => non_empty(&record.location),
        keys::UID => record.uid.as_deref().and_then(non_empty),
        keys::DATASET_ID => non_empty(&record.dataset_id),
        keys::DATASET_REFCOMMIT => non_empty(&record.dataset_refcommit),
        _ => {
            let field = record.field(key)?;
            let value = field.render()?;
            Some(if field.approved {
                format!("{value}  [approved]")
            } else {
                value
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hirni_core::{EntityType, Field};

    fn render(record: &SpecRecord) -> String {
        let mut buf = Vec::new();
        write_record_card(&mut buf, record).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn groups_fields_into_sections() {
        let record = SpecRecord::dicom_series("1.2.3", "dicoms")
            .with_provenance("ds-1", "abc123")
            .with_field(keys::SUBJECT, Field::approved("02"))
            .with_field(keys::TASK, Field::derived("rest"))
            .with_field(keys::CONVERTER, Field::derived("heudiconv"))
            .with_field(keys::DESCRIPTION, Field::derived("func_task-rest"));
        let card = render(&record);

        assert!(card.starts_with("=== dicomseries 1.2.3 ===\nfunc_task-rest\n\nIdentity\n"));
        assert!(card.contains("\nBIDS\n"));
        assert!(card.contains("  subject                    02  [approved]\n"));
        assert!(card.contains("  task                       rest\n"));
        assert!(card.contains("\nConversion\n  converter                  heudiconv\n"));
        assert!(!card.contains("Other"));
    }

    #[test]
    fn empty_sections_are_skipped() {
        let record = SpecRecord::new(EntityType::GenericFile, "beh/events.tsv")
            .with_provenance("ds-1", "abc123")
            .with_field(keys::CONVERTER, Field::default());
        let card = render(&record);
        assert!(card.contains("Identity"));
        assert!(!card.contains("BIDS"));
        assert!(!card.contains("Conversion"));
        assert!(!card.contains("  uid"));
    }
}

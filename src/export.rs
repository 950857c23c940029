use std::io::{Read, Write};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;

use crate::models::CanonicalLead;
use crate::report::LeadDataset;

/// CSV with a header row of CanonicalLead field names.
pub fn write_csv<W: Write>(dataset: &LeadDataset, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for lead in dataset.leads() {
        csv_writer
            .serialize(lead)
            .context("Failed to serialize lead")?;
    }
    // An empty export still carries the header
    if dataset.is_empty() {
        csv_writer.write_record(HEADER)?;
    }
    csv_writer.flush()?;
    Ok(())
}

const HEADER: [&str; 7] = [
    "date",
    "subject_name",
    "phone",
    "status_raw",
    "status_category",
    "source_id",
    "tab_name",
];

/// Read back a file produced by `write_csv`.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<CanonicalLead>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let mut leads = Vec::new();
    for (line_num, result) in csv_reader.deserialize().enumerate() {
        let lead: CanonicalLead =
            result.with_context(|| format!("CSV parse error at line {}", line_num + 2))?;
        leads.push(lead);
    }
    Ok(leads)
}

pub fn default_file_name(now: NaiveDateTime) -> String {
    format!("leads_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusCategory;
    use chrono::NaiveDate;

    fn lead(name: &str, phone: &str, status: &str, cat: StatusCategory) -> CanonicalLead {
        CanonicalLead {
            date: NaiveDate::from_ymd_opt(2024, 9, 5).unwrap(),
            subject_name: name.into(),
            phone: phone.into(),
            status_raw: status.into(),
            status_category: cat,
            source_id: "Maria Eduarda".into(),
            tab_name: "Setembro".into(),
        }
    }

    #[test]
    fn header_matches_field_names() {
        let ds = LeadDataset::from_leads(vec![lead("Ana", "1199", "PAGO", StatusCategory::Closed)]);
        let mut buf = Vec::new();
        write_csv(&ds, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let first = text.lines().next().unwrap();
        assert_eq!(first, HEADER.join(","));
        assert!(text.contains("2024-09-05,Ana,1199,PAGO,Closed,Maria Eduarda,Setembro"));
    }

    #[test]
    fn export_reparses_to_same_values() {
        let ds = LeadDataset::from_leads(vec![
            lead("Ana, \"a Rainha\"", "(11) 9999-0000", "PAGO", StatusCategory::Closed),
            lead("", "1188", "", StatusCategory::Lost),
            lead("João", "", "NÃO RESPONDE", StatusCategory::Lost),
        ]);
        let mut buf = Vec::new();
        write_csv(&ds, &mut buf).unwrap();
        let back = read_csv(buf.as_slice()).unwrap();
        assert_eq!(back, ds.leads());
    }

    #[test]
    fn empty_export_has_header_only() {
        let mut buf = Vec::new();
        write_csv(&LeadDataset::default(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.trim_end(), HEADER.join(","));
        assert!(read_csv(text.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn timestamped_name() {
        let now = NaiveDate::from_ymd_opt(2024, 9, 5)
            .unwrap()
            .and_hms_opt(14, 3, 9)
            .unwrap();
        assert_eq!(default_file_name(now), "leads_20240905_140309.csv");
    }
}

/// Indices of header-like rows among the first `scan_rows` rows.
///
/// A row is header-like when its lower-cased, space-joined text contains at
/// least `min_matches` distinct keywords. Every such row is reported, not
/// only the first, since exports sometimes repeat the header.
pub fn header_rows(
    rows: &[Vec<String>],
    keywords: &[String],
    scan_rows: usize,
    min_matches: usize,
) -> Vec<usize> {
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

    rows.iter()
        .take(scan_rows)
        .enumerate()
        .filter(|(_, row)| {
            let joined = row.join(" ").to_lowercase();
            let hits = keywords
                .iter()
                .filter(|k| !k.is_empty() && joined.contains(k.as_str()))
                .count();
            hits >= min_matches
        })
        .map(|(i, _)| i)
        .collect()
}

/// Rows with the header-like ones removed.
pub fn strip_header_rows(
    rows: &[Vec<String>],
    keywords: &[String],
    scan_rows: usize,
    min_matches: usize,
) -> (Vec<Vec<String>>, usize) {
    let marked = header_rows(rows, keywords, scan_rows, min_matches);
    let kept = rows
        .iter()
        .enumerate()
        .filter(|(i, _)| !marked.contains(i))
        .map(|(_, r)| r.clone())
        .collect();
    (kept, marked.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw() -> Vec<String> {
        ["data", "nome", "telefone", "status"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn two_keywords_is_header() {
        let rows = vec![
            row(&["DATA", "Nome", "Telefone", "", "STATUS"]),
            row(&["05/09/2024", "Ana", "11999", "", "PAGO"]),
        ];
        assert_eq!(header_rows(&rows, &kw(), 5, 2), vec![0]);
    }

    #[test]
    fn single_keyword_row_is_kept() {
        let rows = vec![row(&["05/09/2024", "Status Quo Ltda", "11999", "", "PAGO"])];
        assert!(header_rows(&rows, &kw(), 5, 2).is_empty());
    }

    #[test]
    fn repeated_headers_all_removed() {
        let rows = vec![
            row(&["Planilha Setembro", "", ""]),
            row(&["Data", "Nome", "Telefone"]),
            row(&["05/09/2024", "Ana", "11999"]),
            row(&["data", "nome", "telefone"]),
            row(&["06/09/2024", "Bia", "11888"]),
        ];
        let (kept, removed) = strip_header_rows(&rows, &kw(), 5, 2);
        assert_eq!(removed, 2);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[1][1], "Ana");
    }

    #[test]
    fn only_scans_first_rows() {
        let mut rows: Vec<Vec<String>> = (0..5).map(|i| row(&[&i.to_string(), "x", "y"])).collect();
        rows.push(row(&["Data", "Nome", "Telefone"]));
        assert!(header_rows(&rows, &kw(), 5, 2).is_empty());
    }
}

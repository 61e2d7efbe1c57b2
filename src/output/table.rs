#![forbid(unsafe_code)]

use std::io;

/// Plain aligned columns for terminals, CSV for scripts.
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cols: impl IntoIterator<Item = impl Into<String>>) {
        self.rows.push(cols.into_iter().map(Into::into).collect());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn print(&self) -> io::Result<()> {
        self.write_aligned(io::stdout().lock())
    }

    pub fn print_csv(&self) -> io::Result<()> {
        self.write_csv(io::stdout().lock())
    }

    pub fn write_csv(&self, out: impl io::Write) -> io::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_aligned(&self, mut out: impl io::Write) -> io::Result<()> {
        let widths = self.column_widths();
        writeln!(out, "{}", format_row(&self.headers, &widths))?;
        for row in &self.rows {
            writeln!(out, "{}", format_row(row, &widths))?;
        }
        Ok(())
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| visible_width(h)).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                match widths.get_mut(i) {
                    Some(w) => *w = (*w).max(visible_width(cell)),
                    None => widths.push(visible_width(cell)),
                }
            }
        }
        widths
    }
}

fn visible_width(s: &str) -> usize {
    // One column per char; wide glyphs are rare in task titles.
    s.chars().count()
}

fn format_row(row: &[String], widths: &[usize]) -> String {
    let last = row.len().saturating_sub(1);
    let mut out = String::new();
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        // No trailing padding after the final column.
        if i < last {
            let w = widths.get(i).copied().unwrap_or(0);
            out.extend(std::iter::repeat_n(' ', w.saturating_sub(visible_width(cell))));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(["ID", "TITLE", "DUE"]);
        t.row(["1", "Buy milk", "2030-01-01"]);
        t.row(["22", "Call \"mom\", later", "-"]);
        t
    }

    #[test]
    fn aligns_columns_without_trailing_spaces() {
        let mut buf = Vec::new();
        sample().write_aligned(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID  TITLE              DUE");
        assert_eq!(lines[1], "1   Buy milk           2030-01-01");
        assert!(lines.iter().all(|l| !l.ends_with(' ')));
    }

    #[test]
    fn csv_quotes_cells_that_need_it() {
        let mut buf = Vec::new();
        sample().write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("ID,TITLE,DUE\n"));
        assert!(text.contains("22,\"Call \"\"mom\"\", later\",-"));
    }
}

// mapache is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

enum Row {
    Cells(Vec<String>),
    Separator,
}

/// A small plain-text table renderer for CLI summary output. Column widths
/// are computed from the longest cell (ANSI color codes are stripped before
/// measuring, so `colored`-wrapped strings still align).
pub struct Table {
    alignments: Vec<Alignment>,
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new_with_alignments(alignments: Vec<Alignment>) -> Self {
        Self {
            alignments,
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn set_headers(&mut self, headers: Vec<String>) {
        self.headers = headers;
    }

    pub fn add_row(&mut self, cells: Vec<String>) {
        self.rows.push(Row::Cells(cells));
    }

    pub fn add_separator(&mut self) {
        self.rows.push(Row::Separator);
    }

    fn visible_len(s: &str) -> usize {
        // Strip ANSI escape sequences before measuring column width.
        let mut len = 0;
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\u{1b}' {
                for esc_c in chars.by_ref() {
                    if esc_c == 'm' {
                        break;
                    }
                }
            } else {
                len += 1;
            }
        }
        len
    }

    pub fn render(&self) -> String {
        let num_cols = self.alignments.len();
        let mut widths = vec![0usize; num_cols];

        for (i, header) in self.headers.iter().enumerate().take(num_cols) {
            widths[i] = widths[i].max(Self::visible_len(header));
        }
        for row in &self.rows {
            if let Row::Cells(cells) = row {
                for (i, cell) in cells.iter().enumerate().take(num_cols) {
                    widths[i] = widths[i].max(Self::visible_len(cell));
                }
            }
        }

        let mut out = String::new();
        if !self.headers.is_empty() {
            out.push_str(&self.render_row(&self.headers, &widths));
            out.push('\n');
        }

        for row in &self.rows {
            match row {
                Row::Cells(cells) => {
                    out.push_str(&self.render_row(cells, &widths));
                    out.push('\n');
                }
                Row::Separator => {
                    let total: usize = widths.iter().sum::<usize>() + (num_cols.saturating_sub(1) * 2);
                    out.push_str(&"-".repeat(total));
                    out.push('\n');
                }
            }
        }

        out.trim_end_matches('\n').to_string()
    }

    fn render_row(&self, cells: &[String], widths: &[usize]) -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(0);
                let pad = width.saturating_sub(Self::visible_len(cell));
                match self.alignments.get(i).copied().unwrap_or(Alignment::Left) {
                    Alignment::Left => format!("{cell}{}", " ".repeat(pad)),
                    Alignment::Right => format!("{}{cell}", " ".repeat(pad)),
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_aligns_columns() {
        let mut table = Table::new_with_alignments(vec![Alignment::Left, Alignment::Right]);
        table.set_headers(vec!["Name".to_string(), "Count".to_string()]);
        table.add_row(vec!["Files".to_string(), "10".to_string()]);
        table.add_row(vec!["Directories".to_string(), "2".to_string()]);

        let rendered = table.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Name"));
    }
}

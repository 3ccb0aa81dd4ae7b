use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};
use tracing::info;

use crate::cache::Cache;
use crate::domain::AppName;
use crate::error::IprError;

pub const DEFAULT_XLS_FILE_NAME: &str = "iprstats.xlsx";

const HEADERS: [&str; 7] = [
    "Count", "DB Name", "DB ID", "GO Name", "GO ID", "DB Link", "GO Link",
];

/// Workbook with one worksheet per app.
pub struct XlsExporter<'a> {
    cache: &'a Cache,
}

impl<'a> XlsExporter<'a> {
    pub fn new(cache: &'a Cache) -> Self {
        Self { cache }
    }

    /// Exports `app` only, or every configured app. Without a path the
    /// workbook lands in the working directory as `iprstats.xlsx`.
    pub fn export(&self, app: Option<&AppName>, path: Option<&Path>) -> Result<PathBuf, IprError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_XLS_FILE_NAME));
        let mut workbook = Workbook::new();
        let apps = match app {
            Some(app) => vec![app.clone()],
            None => self.cache.apps().to_vec(),
        };
        for app in &apps {
            let sheet = workbook.add_worksheet();
            self.write_sheet(app, sheet).map_err(export_error)?;
        }
        workbook.save(&path).map_err(export_error)?;
        info!(path = %path.display(), sheets = apps.len(), "spreadsheet export finished");
        Ok(path)
    }

    fn write_sheet(&self, app: &AppName, sheet: &mut Worksheet) -> Result<(), XlsxError> {
        let header = Format::new()
            .set_bold()
            .set_font_color(Color::Red)
            .set_font_name("Times New Roman");
        sheet.set_name(app.as_str())?;
        for (col, title) in (0u16..).zip(HEADERS) {
            sheet.write_string_with_format(0, col, title, &header)?;
        }

        let app = app.as_str();
        for index in 0..self.cache.get_match_length(app) {
            let Some(row) = self.cache.get_one_row(app, index) else {
                break;
            };
            let Ok(line) = u32::try_from(index + 1) else {
                break;
            };
            sheet.write_number(line, 0, row.count as f64)?;
            sheet.write_string(line, 1, &row.name)?;
            sheet.write_string(line, 2, &row.db_id)?;
            let optional = [
                (3, row.go_name),
                (4, row.go_id),
                (5, self.cache.get_url(app, index, false)),
                (6, self.cache.get_url(app, index, true)),
            ];
            for (col, value) in optional {
                if let Some(value) = value {
                    sheet.write_string(line, col, &value)?;
                }
            }
        }
        Ok(())
    }
}

fn export_error(err: XlsxError) -> IprError {
    IprError::Export(err.to_string())
}

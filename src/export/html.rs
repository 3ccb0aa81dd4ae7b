
use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::escape::escape;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::chart::Chart;
use crate::config::ChartSettings;
use crate::domain::{AppName, ChartGenerator};
use crate::error::IprError;
use crate::store::SessionStore;

pub const STYLE_CSS: &str = "body { font-family: Verdana, Arial, sans-serif; font-size: 13px; margin: 0; background: #f4f4f4; }
#container { width: 960px; margin: 0 auto; background: #ffffff; }
#header { background: #336699; color: #ffffff; padding: 12px 20px; }
#header h1 { margin: 0; font-size: 24px; }
#middlesec { overflow: hidden; }
ul.menu { list-style: none; margin: 0; padding: 10px; float: left; width: 160px; }
ul.menu li a { display: block; padding: 4px 8px; color: #336699; text-decoration: none; }
ul.menu li.selected a { background: #336699; color: #ffffff; }
#content { margin-left: 190px; padding: 10px 20px; }
table { border-collapse: collapse; width: 100%; }
th, td { border-bottom: 1px solid #dddddd; padding: 4px 8px; text-align: left; }
tr.highlight { background: #e8eef4; }
#footer { clear: both; height: 20px; }
";

/// One page per app, with navigation, chart and link table.
pub struct HtmlExporter<'a> {
    cache: &'a Cache,
    chart: ChartSettings,
}

impl<'a> HtmlExporter<'a> {
    pub fn new(cache: &'a Cache, chart: &ChartSettings) -> Self {
        Self {
            cache,
            chart: ChartSettings {
                generator: ChartGenerator::Svg,
                ..*chart
            },
        }
    }

    pub fn page_name(app: &AppName) -> String {
        format!("{}.html", app.as_str().to_lowercase())
    }

    /// Writes `style.css` and every app page into `directory`.
    pub fn export(&self, directory: &Utf8Path) -> Result<Vec<Utf8PathBuf>, IprError> {
        SessionStore::write_bytes_atomic(&directory.join("style.css"), STYLE_CSS.as_bytes())?;
        let pages = self
            .cache
            .apps()
            .iter()
            .map(|app| self.export_page(app, directory))
            .collect::<Result<Vec<_>, _>>()?;
        info!(directory = %directory, pages = pages.len(), "html export finished");
        Ok(pages)
    }

    pub fn export_page(&self, app: &AppName, directory: &Utf8Path) -> Result<Utf8PathBuf, IprError> {
        let chart_name = format!("{}_matches.svg", app.as_str().to_lowercase());
        let chart = Chart::for_app(app.clone());
        let chart_file = chart
            .save(self.cache, &self.chart, &directory.join(&chart_name))?
            .then_some(chart_name);
        let page = self.render_page(app, chart_file.as_deref());
        let path = directory.join(Self::page_name(app));
        SessionStore::write_bytes_atomic(&path, page.as_bytes())?;
        debug!(app = %app, path = %path, "html page written");
        Ok(path)
    }

    pub fn render_page(&self, app: &AppName, chart_file: Option<&str>) -> String {
        let mut page = String::new();
        page.push_str(
            "<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\n <head>\n  \
             <meta http-equiv=\"Content-Type\" content=\"text/html; charset=utf-8\" />\n  \
             <title>IPRStats Results</title>\n  \
             <link href=\"style.css\" rel=\"stylesheet\" type=\"text/css\" />\n </head>\n <body>\n  \
             <div id=\"container\">\n   <div id=\"header\">\n    <h1>IPRStats</h1>\n   </div>\n   \
             <div id=\"middlesec\">\n",
        );
        page.push_str(&self.menu(app));
        page.push_str("    <div id=\"content\">\n");
        if let Some(chart_file) = chart_file {
            page.push_str(&format!(
                "     <img src=\"{}\" alt=\"{} Matches\" />\n",
                escape(chart_file),
                escape(app.as_str())
            ));
        }
        page.push_str(&self.table(app));
        page.push_str(
            "    </div>\n   </div>\n   <div id=\"footer\">\n   </div>\n  </div>\n </body>\n</html>\n",
        );
        page
    }

    fn menu(&self, current: &AppName) -> String {
        let mut menu = String::from("    <ul class=\"menu\" id=\"navigation\">");
        for app in self.cache.apps() {
            let selected = if app == current {
                " class=\"selected\""
            } else {
                ""
            };
            menu.push_str(&format!(
                "<li{selected}>{}</li>",
                link(app.as_str(), Some(&Self::page_name(app)), None)
            ));
        }
        menu.push_str("</ul>\n");
        menu
    }

    fn table(&self, app: &AppName) -> String {
        let mut table = String::from(
            "<table cellspacing=\"0\">\n  <tr class=\"highlight\">\n    <th>Name</th>\n    \
             <th>Count</th>\n    <th>Link</th>\n  </tr>\n",
        );
        let go_names = self.cache.go_status().is_enabled();
        let app = app.as_str();
        for index in 0..self.cache.get_match_length(app) {
            let Some(row) = self.cache.get_one_row(app, index) else {
                break;
            };
            let go_text = if go_names {
                row.go_name.as_deref().or(row.go_id.as_deref())
            } else {
                row.go_id.as_deref()
            };
            table.push_str(&format!(
                "<tr>\n<td>{}</td>\n<td>{}</td>\n<td>{}</td>\n</tr>\n",
                link(
                    &row.name,
                    self.cache.get_url(app, index, false).as_deref(),
                    Some("_blank")
                ),
                row.count,
                go_text
                    .map(|text| link(
                        text,
                        self.cache.get_url(app, index, true).as_deref(),
                        Some("_blank")
                    ))
                    .unwrap_or_default(),
            ));
        }
        table.push_str("</table>\n");
        table
    }
}

fn link(name: &str, url: Option<&str>, target: Option<&str>) -> String {
    let Some(url) = url else {
        return escape(name).into_owned();
    };
    let target = target
        .map(|target| format!(" target=\"{target}\""))
        .unwrap_or_default();
    format!("<a href=\"{}\"{target}>{}</a>", escape(url), escape(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_escapes_markup() {
        assert_eq!(
            link("a<b", Some("http://x?a=1&b=2"), Some("_blank")),
            "<a href=\"http://x?a=1&amp;b=2\" target=\"_blank\">a&lt;b</a>"
        );
        assert_eq!(link("plain", None, None), "plain");
    }
}

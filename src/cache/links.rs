use std::collections::HashMap;

pub const GO_TEMPLATE: &str = "http://www.ebi.ac.uk/QuickGO/GTerm?id=%s#ancchart";

const PROSITE_TEMPLATE: &str = "http://expasy.org/cgi-bin/prosite-search-ac?%s";

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    ("PFAM", "http://pfam.janelia.org/family?acc=%s"),
    ("PIR", "http://pir.georgetown.edu/cgi-bin/ipcSF?id=%s"),
    ("HAMAP", "http://www.expasy.org/unirule/%s"),
    (
        "PANTHER",
        "http://www.pantherdb.org/panther/family.do?clsAccession=%s",
    ),
    (
        "PRINTS",
        "http://www.bioinf.manchester.ac.uk/cgi-bin/dbbrowser/PRINTS/DoPRINTS.pl?cmd_a=Display&qua_a=none&fun_a=Text&qst_a=%s",
    ),
    (
        "PRODOM",
        "http://prodom.prabi.fr/prodom/current/cgi-bin/request.pl?question=DBEN&query=%s",
    ),
    ("PRO", PROSITE_TEMPLATE),
    ("PROSITE", PROSITE_TEMPLATE),
    ("PROFILE", PROSITE_TEMPLATE),
    (
        "SMART",
        "http://smart.embl-heidelberg.de/smart/do_annotation.pl?BLAST=DUMMY&DOMAIN=%s",
    ),
    (
        "SUPERFAMILY",
        "http://supfam.cs.bris.ac.uk/SUPERFAMILY/cgi-bin/scop.cgi?ipid=%s",
    ),
    (
        "TIGRFAMs",
        "http://cmr.jcvi.org/cgi-bin/CMR/HmmReport.cgi?hmm_acc=%s",
    ),
    ("GENE3D", "http://www.cathdb.info/gene3d/%s"),
];

/// What `get_url` does for an app without its own template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GoFallback {
    /// Link the db id through the GO template.
    #[default]
    UseGoTemplate,
    NoLink,
}

/// Static app -> URL template map plus the GO template. Templates carry one
/// `%s` placeholder for the id.
#[derive(Debug, Clone)]
pub struct LinkTable {
    templates: HashMap<String, String>,
    go_template: String,
}

impl Default for LinkTable {
    fn default() -> Self {
        Self {
            templates: DEFAULT_TEMPLATES
                .iter()
                .map(|(app, template)| (app.to_string(), template.to_string()))
                .collect(),
            go_template: GO_TEMPLATE.to_string(),
        }
    }
}

impl LinkTable {
    pub fn template(&self, app: &str) -> Option<&str> {
        self.templates.get(app).map(String::as_str)
    }

    pub fn with_template(mut self, app: &str, template: &str) -> Self {
        self.templates.insert(app.to_string(), template.to_string());
        self
    }

    pub fn resolve(
        &self,
        app: &str,
        id: Option<&str>,
        go_link: bool,
        fallback: GoFallback,
    ) -> Option<String> {
        let id = id?;
        let template = if go_link {
            &self.go_template
        } else {
            match (self.templates.get(app), fallback) {
                (Some(template), _) => template,
                (None, GoFallback::UseGoTemplate) => &self.go_template,
                (None, GoFallback::NoLink) => return None,
            }
        };
        Some(template.replacen("%s", id, 1))
    }
}

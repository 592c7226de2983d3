//! Session export as a single Markdown or standalone HTML document.
//!
//! Loading is separated from rendering: [`load_snapshot`] reads everything a
//! session export needs in a handful of queries and the `render_*` functions
//! are pure.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use chrono::NaiveDateTime;
use diesel::{prelude::*, PgConnection};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::markdown::{markdown_to_html, wrap_html_document};
use crate::models::{Annotation, Decision, Document, Session, Vote};
use crate::schema::{annotations, documents, votes};
use crate::services::decisions::{list_decisions, tally_votes};
use crate::services::documents::list_session_documents;
use crate::services::sessions::find_session;
use crate::services::ServiceResult;
use crate::views::load_participants;

const DATE_FORMAT: &str = "%d/%m/%Y %H:%M";
const FILENAME_MAX_CHARS: usize = 50;

static ANCHOR_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9\s-]").expect("anchor pattern is valid"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static FILENAME_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\-_\s]").expect("filename pattern is valid"));

#[derive(Debug, Clone)]
pub struct ExportAnnotation {
    pub annotation: Annotation,
    pub author: String,
    pub replies: Vec<ExportAnnotation>,
}

#[derive(Debug, Clone)]
pub struct ExportDecision {
    pub decision: Decision,
    pub vote_stats: BTreeMap<Uuid, i64>,
    pub linked_document: Option<String>,
}

/// Everything needed to render one session.
#[derive(Debug, Clone)]
pub struct ExportSnapshot {
    pub session: Session,
    /// All documents of the session, siblings in sort order.
    pub documents: Vec<Document>,
    /// Root annotations per document, newest first, with their reply trees.
    pub annotations: HashMap<Uuid, Vec<ExportAnnotation>>,
    pub decisions: Vec<ExportDecision>,
}

pub fn load_snapshot(conn: &mut PgConnection, session_id: Uuid) -> ServiceResult<ExportSnapshot> {
    let session = find_session(conn, session_id)?;
    let documents = list_session_documents(conn, session_id)?;

    let session_documents = documents::table
        .filter(documents::session_id.eq(session_id))
        .select(documents::id);
    let rows: Vec<Annotation> = annotations::table
        .filter(annotations::document_id.eq_any(session_documents))
        .order(annotations::created_at.asc())
        .load(conn)?;
    let author_ids: Vec<Uuid> = rows.iter().map(|annotation| annotation.author_id).collect();
    let authors = load_participants(conn, &author_ids)?;

    let mut roots: Vec<Annotation> = Vec::new();
    let mut replies: HashMap<Uuid, Vec<Annotation>> = HashMap::new();
    for annotation in rows {
        match annotation.parent_id {
            Some(parent_id) => replies.entry(parent_id).or_default().push(annotation),
            None => roots.push(annotation),
        }
    }
    roots.reverse();

    let mut by_document: HashMap<Uuid, Vec<ExportAnnotation>> = HashMap::new();
    for root in roots {
        let document_id = root.document_id;
        let tree = build_annotation_tree(root, &mut replies, &|id| {
            authors
                .get(&id)
                .map(|participant| participant.pseudo.clone())
                .unwrap_or_default()
        });
        by_document.entry(document_id).or_default().push(tree);
    }

    let decisions = list_decisions(conn, session_id, None, None)?;
    let decision_ids: Vec<Uuid> = decisions.iter().map(|decision| decision.id).collect();
    let mut votes_by_decision: HashMap<Uuid, Vec<Vote>> = HashMap::new();
    if !decision_ids.is_empty() {
        let rows: Vec<Vote> = votes::table
            .filter(votes::decision_id.eq_any(&decision_ids))
            .load(conn)?;
        for vote in rows {
            votes_by_decision.entry(vote.decision_id).or_default().push(vote);
        }
    }
    let titles: HashMap<Uuid, &str> = documents
        .iter()
        .map(|document| (document.id, document.title.as_str()))
        .collect();
    let decisions = decisions
        .into_iter()
        .map(|decision| {
            let votes = votes_by_decision.remove(&decision.id).unwrap_or_default();
            let vote_stats = tally_votes(&decision.option_list(), &votes);
            let linked_document = decision
                .linked_document_id
                .and_then(|id| titles.get(&id).map(|title| title.to_string()));
            ExportDecision {
                decision,
                vote_stats,
                linked_document,
            }
        })
        .collect();

    Ok(ExportSnapshot {
        session,
        documents,
        annotations: by_document,
        decisions,
    })
}

fn build_annotation_tree(
    annotation: Annotation,
    replies: &mut HashMap<Uuid, Vec<Annotation>>,
    pseudo_of: &dyn Fn(Uuid) -> String,
) -> ExportAnnotation {
    let children = replies.remove(&annotation.id).unwrap_or_default();
    let replies = children
        .into_iter()
        .map(|child| build_annotation_tree(child, replies, pseudo_of))
        .collect();
    ExportAnnotation {
        author: pseudo_of(annotation.author_id),
        annotation,
        replies,
    }
}

fn format_date(dt: NaiveDateTime) -> String {
    dt.format(DATE_FORMAT).to_string()
}

pub fn session_status_label(status: &str) -> &str {
    match status {
        "preparation" => "Préparation",
        "en_cours" => "En cours",
        "termine" => "Terminé",
        "archive" => "Archivé",
        other => other,
    }
}

pub fn document_type_label(doc_type: &str) -> &str {
    match doc_type {
        "synthesis" => "Synthèse",
        "question" => "Question",
        "comparison" => "Comparaison",
        "annexe" => "Annexe",
        "compte_rendu" => "Compte-rendu",
        "general" => "Général",
        other => other,
    }
}

pub fn decision_status_label(status: &str) -> &str {
    match status {
        "ouvert" => "Ouvert",
        "en_discussion" => "En discussion",
        "consensus" => "Consensus",
        "valide" => "Validé",
        "reporte" => "Reporté",
        other => other,
    }
}

fn annotation_icon(annotation_type: &str) -> &'static str {
    match annotation_type {
        "comment" => "💬",
        "question" => "❓",
        "suggestion" => "💡",
        "objection" => "⚠️",
        "validation" => "✅",
        _ => "📝",
    }
}

fn decision_icon(status: &str) -> &'static str {
    match status {
        "ouvert" => "🔵",
        "en_discussion" => "🟡",
        "consensus" => "🟢",
        "valide" => "✅",
        "reporte" => "🔴",
        _ => "⚪",
    }
}

/// Fragment identifier for a document title. Non-ASCII letters are dropped.
pub fn anchor(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = ANCHOR_STRIP_RE.replace_all(&lowered, "");
    let dashed = WHITESPACE_RE.replace_all(&stripped, "-");
    dashed.trim_matches('-').to_string()
}

/// `Session_title.md` style download name.
pub fn export_filename(title: &str, extension: &str) -> String {
    let stripped = FILENAME_STRIP_RE.replace_all(title, "");
    let underscored = WHITESPACE_RE.replace_all(&stripped, "_");
    let truncated: String = underscored.chars().take(FILENAME_MAX_CHARS).collect();
    format!("{truncated}.{extension}")
}

/// Content-Disposition header value forcing a download.
pub fn attachment_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();
    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!("attachment; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}")
}

struct Tree<'a> {
    children: HashMap<Option<Uuid>, Vec<&'a Document>>,
}

impl<'a> Tree<'a> {
    fn new(documents: &'a [Document]) -> Self {
        let mut children: HashMap<Option<Uuid>, Vec<&'a Document>> = HashMap::new();
        let known: HashMap<Uuid, ()> = documents.iter().map(|doc| (doc.id, ())).collect();
        for document in documents {
            let parent = document.parent_id.filter(|id| known.contains_key(id));
            children.entry(parent).or_default().push(document);
        }
        Self { children }
    }

    fn children_of(&self, parent: Option<Uuid>) -> &[&'a Document] {
        self.children
            .get(&parent)
            .map(|docs| docs.as_slice())
            .unwrap_or(&[])
    }
}

pub fn render_markdown(snapshot: &ExportSnapshot) -> String {
    let session = &snapshot.session;
    let tree = Tree::new(&snapshot.documents);
    let mut out = String::new();

    let _ = writeln!(out, "# {}", session.title);
    out.push('\n');
    if let Some(description) = session.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "{description}");
        out.push('\n');
    }
    let _ = writeln!(out, "**Statut:** {}", session_status_label(&session.status));
    let _ = writeln!(out, "**Créé le:** {}", format_date(session.created_at));
    let _ = writeln!(
        out,
        "**Dernière mise à jour:** {}",
        format_date(session.updated_at)
    );
    out.push_str("\n---\n\n");

    let roots = tree.children_of(None);
    if !roots.is_empty() {
        out.push_str("## Table des matières\n\n");
        write_toc(&mut out, &tree, roots, 0);
        out.push_str("\n---\n\n");
    }

    out.push_str("## Documents\n\n");
    for document in roots {
        write_document(&mut out, snapshot, &tree, document, 2);
    }

    if !snapshot.decisions.is_empty() {
        out.push_str("---\n\n## Décisions\n\n");
        for decision in &snapshot.decisions {
            write_decision(&mut out, decision);
        }
    }

    // Lines are newline-joined: the last one carries no terminator.
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

fn write_toc(out: &mut String, tree: &Tree<'_>, documents: &[&Document], level: usize) {
    for document in documents {
        let _ = writeln!(
            out,
            "{}- [{}](#{})",
            "  ".repeat(level),
            document.title,
            anchor(&document.title)
        );
        write_toc(out, tree, tree.children_of(Some(document.id)), level + 1);
    }
}

fn write_document(
    out: &mut String,
    snapshot: &ExportSnapshot,
    tree: &Tree<'_>,
    document: &Document,
    heading_level: usize,
) {
    let _ = writeln!(out, "<a id=\"{}\"></a>", anchor(&document.title));
    let _ = writeln!(out, "{} {}", "#".repeat(heading_level), document.title);
    out.push('\n');
    let _ = writeln!(out, "*Type: {} | ", document_type_label(&document.doc_type));
    let _ = writeln!(out, "Version: {} | ", document.current_version);
    let _ = writeln!(out, "Mis à jour: {}*", format_date(document.updated_at));
    out.push('\n');

    if !document.content.is_empty() {
        let _ = writeln!(out, "{}", document.content);
        out.push('\n');
    }

    if let Some(annotations) = snapshot
        .annotations
        .get(&document.id)
        .filter(|list| !list.is_empty())
    {
        out.push_str("#### Annotations\n\n");
        for annotation in annotations {
            write_annotation(out, annotation, 0);
        }
        out.push('\n');
    }

    for child in tree.children_of(Some(document.id)) {
        write_document(out, snapshot, tree, child, (heading_level + 1).min(6));
    }
}

fn write_annotation(out: &mut String, entry: &ExportAnnotation, depth: usize) {
    let indent = "  ".repeat(depth);
    let annotation = &entry.annotation;
    let badge = if annotation.status == "resolved" { " ✅" } else { "" };
    let _ = writeln!(
        out,
        "{indent}- {} **{}** ",
        annotation_icon(&annotation.annotation_type),
        entry.author
    );
    let _ = writeln!(
        out,
        "{indent}  *({})*{badge}",
        format_date(annotation.created_at)
    );
    let _ = writeln!(out, "{indent}  ");
    let continuation = format!("\n{indent}  ");
    let _ = writeln!(
        out,
        "{indent}  {}",
        annotation.content.replace('\n', &continuation)
    );
    for reply in &entry.replies {
        write_annotation(out, reply, depth + 1);
    }
}

fn write_decision(out: &mut String, entry: &ExportDecision) {
    let decision = &entry.decision;
    let _ = writeln!(out, "### {} {}", decision_icon(&decision.status), decision.title);
    out.push('\n');
    let _ = writeln!(
        out,
        "**Statut:** {}",
        decision_status_label(&decision.status)
    );
    if let Some(title) = &entry.linked_document {
        let _ = writeln!(out, "**Document lié:** {title}");
    }
    out.push('\n');

    if let Some(description) = decision.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "{description}");
        out.push('\n');
    }

    out.push_str("**Options:**\n\n");
    for option in decision.option_list() {
        let count = entry.vote_stats.get(&option.id).copied().unwrap_or(0);
        let selected = if decision.selected_option_id == Some(option.id) {
            " ✓ **VALIDÉ**"
        } else {
            ""
        };
        let _ = writeln!(out, "- **{}** ({count} vote(s)){selected}", option.label);
        if let Some(description) = option.description.as_deref().filter(|d| !d.is_empty()) {
            let _ = writeln!(out, "  {description}");
        }
    }
    out.push('\n');
}

/// Renders the Markdown export as a standalone page. `exported_at` is the
/// footer timestamp.
pub fn render_html(snapshot: &ExportSnapshot, exported_at: NaiveDateTime) -> String {
    let markdown = render_markdown(snapshot);
    let body = markdown_to_html(&markdown);
    let stamp = exported_at.format("%d/%m/%Y à %H:%M").to_string();
    wrap_html_document(&snapshot.session.title, &body, &stamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    use crate::models::DecisionOption;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 8)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .unwrap()
    }

    fn document(title: &str, parent_id: Option<Uuid>, sort_order: i32) -> Document {
        Document {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            parent_id,
            title: title.into(),
            slug: anchor(title),
            content: format!("Contenu de {title}"),
            doc_type: "general".into(),
            metadata: None,
            sort_order,
            current_version: 2,
            created_at: at(9, 0),
            updated_at: at(10, 30),
        }
    }

    fn annotation(document_id: Uuid, content: &str, status: &str) -> Annotation {
        Annotation {
            id: Uuid::new_v4(),
            document_id,
            author_id: Uuid::new_v4(),
            parent_id: None,
            resolved_by_id: None,
            content: content.into(),
            annotation_type: "question".into(),
            status: status.into(),
            anchor: None,
            mentions: json!([]),
            taken_into_account: false,
            created_at: at(11, 15),
            updated_at: at(11, 15),
        }
    }

    fn snapshot() -> ExportSnapshot {
        let plan = document("Plan d'action", None, 0);
        let budget = document("Budget", Some(plan.id), 0);
        let question = annotation(plan.id, "Quel délai ?\nAvant mars ?", "resolved");
        let mut reply = annotation(plan.id, "Fin février", "open");
        reply.annotation_type = "comment".into();
        reply.parent_id = Some(question.id);

        let option_a = DecisionOption {
            id: Uuid::new_v4(),
            label: "Option A".into(),
            description: Some("La plus simple".into()),
        };
        let option_b = DecisionOption {
            id: Uuid::new_v4(),
            label: "Option B".into(),
            description: None,
        };
        let decision = Decision {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            linked_document_id: Some(plan.id),
            title: "Choix du prestataire".into(),
            description: None,
            status: "valide".into(),
            options: serde_json::to_value([&option_a, &option_b]).unwrap(),
            selected_option_id: Some(option_a.id),
            is_locked: true,
            created_at: at(12, 0),
            updated_at: at(12, 0),
        };

        let mut annotations = HashMap::new();
        annotations.insert(
            plan.id,
            vec![ExportAnnotation {
                annotation: question,
                author: "Alice".into(),
                replies: vec![ExportAnnotation {
                    annotation: reply,
                    author: "Bob".into(),
                    replies: Vec::new(),
                }],
            }],
        );

        ExportSnapshot {
            session: Session {
                id: Uuid::nil(),
                title: "Atelier Q1".into(),
                description: Some("Préparation du trimestre".into()),
                status: "en_cours".into(),
                invite_code: "ABCD2345".into(),
                created_at: at(8, 0),
                updated_at: at(12, 5),
            },
            documents: vec![plan, budget],
            annotations,
            decisions: vec![ExportDecision {
                vote_stats: BTreeMap::from([(option_a.id, 2), (option_b.id, 1)]),
                decision,
                linked_document: Some("Plan d'action".into()),
            }],
        }
    }

    #[test]
    fn anchors_drop_punctuation_and_accents() {
        assert_eq!(anchor("Plan d'action"), "plan-daction");
        assert_eq!(anchor("  Étude  de cas! "), "tude-de-cas");
    }

    #[test]
    fn filenames_are_ascii_and_bounded() {
        assert_eq!(export_filename("Atelier Q1 / bilan", "md"), "Atelier_Q1_bilan.md");
        let long = "a".repeat(80);
        assert_eq!(export_filename(&long, "html").len(), 50 + ".html".len());
    }

    #[test]
    fn disposition_forces_download() {
        assert_eq!(
            attachment_disposition("Atelier_Q1.md"),
            "attachment; filename=\"Atelier_Q1.md\"; filename*=UTF-8''Atelier%5FQ1%2Emd"
        );
    }

    #[test]
    fn markdown_has_header_toc_documents_and_decisions() {
        let markdown = render_markdown(&snapshot());

        assert!(markdown.starts_with("# Atelier Q1\n\nPréparation du trimestre\n\n**Statut:** En cours\n"));
        assert!(markdown.contains("**Créé le:** 08/01/2026 08:00"));
        assert!(markdown.contains("## Table des matières\n\n- [Plan d'action](#plan-daction)\n  - [Budget](#budget)\n"));
        assert!(markdown.contains("<a id=\"plan-daction\"></a>\n## Plan d'action\n"));
        assert!(markdown.contains("<a id=\"budget\"></a>\n### Budget\n"));
        assert!(markdown.contains("*Type: Général | \nVersion: 2 | \nMis à jour: 08/01/2026 10:30*"));
        assert!(markdown.contains("## Décisions\n\n### ✅ Choix du prestataire\n\n**Statut:** Validé\n**Document lié:** Plan d'action\n"));
        assert!(markdown.contains("- **Option A** (2 vote(s)) ✓ **VALIDÉ**\n  La plus simple\n"));
        assert!(markdown.contains("- **Option B** (1 vote(s))\n"));
        assert!(markdown.ends_with("- **Option B** (1 vote(s))\n"));
    }

    #[test]
    fn annotations_are_indented_with_replies() {
        let markdown = render_markdown(&snapshot());

        assert!(markdown.contains("#### Annotations\n\n- ❓ **Alice** \n  *(08/01/2026 11:15)* ✅\n  \n  Quel délai ?\n  Avant mars ?\n"));
        assert!(markdown.contains("  - 💬 **Bob** \n    *(08/01/2026 11:15)*\n    \n    Fin février\n"));
    }

    #[test]
    fn empty_session_skips_toc_and_decisions() {
        let mut snapshot = snapshot();
        snapshot.documents.clear();
        snapshot.decisions.clear();
        let markdown = render_markdown(&snapshot);

        assert!(!markdown.contains("Table des matières"));
        assert!(!markdown.contains("## Décisions"));
        assert!(markdown.ends_with("## Documents\n"));
    }

    #[test]
    fn html_export_wraps_converted_markdown() {
        let html = render_html(&snapshot(), at(18, 45));

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Atelier Q1 - Export Documentation</title>"));
        assert!(html.contains("<h1>Atelier Q1</h1>"));
        assert!(html.contains("<a id=\"plan-daction\"></a>"));
        assert!(html.contains("le 08/01/2026 à 18:45"));
    }
}

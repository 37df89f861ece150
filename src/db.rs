use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::parser::{Block, BlockKind, Section};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            slug          TEXT PRIMARY KEY,
            title         TEXT NOT NULL,
            section_count INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sections (
            id            INTEGER PRIMARY KEY,
            document_slug TEXT NOT NULL REFERENCES documents(slug) ON DELETE CASCADE,
            section_order INTEGER NOT NULL,
            slug          TEXT NOT NULL,
            heading       TEXT NOT NULL,
            title         TEXT NOT NULL,
            headline      TEXT,
            summary       TEXT,
            page          INTEGER NOT NULL,
            UNIQUE(document_slug, section_order),
            UNIQUE(document_slug, slug)
        );
        CREATE INDEX IF NOT EXISTS idx_sections_document ON sections(document_slug);

        CREATE TABLE IF NOT EXISTS blocks (
            id          INTEGER PRIMARY KEY,
            section_id  INTEGER NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
            block_order INTEGER NOT NULL,
            kind        TEXT NOT NULL CHECK(kind IN ('text','image','table')),
            content     TEXT NOT NULL,
            page        INTEGER NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            UNIQUE(section_id, block_order)
        );
        CREATE INDEX IF NOT EXISTS idx_blocks_section ON blocks(section_id);
        ",
    )?;
    Ok(())
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Slugs for section titles, unique within one document.
pub fn section_slugs(sections: &[Section]) -> Vec<String> {
    let mut seen = HashSet::new();
    sections
        .iter()
        .map(|s| {
            let base = match slugify(s.title()) {
                b if b.is_empty() => format!("section-{}", s.order),
                b => b,
            };
            let mut slug = base.clone();
            let mut n = 2;
            while !seen.insert(slug.clone()) {
                slug = format!("{}-{}", base, n);
                n += 1;
            }
            slug
        })
        .collect()
}

pub struct DocumentRow {
    pub slug: String,
    pub title: String,
    pub section_count: usize,
    pub created_at: String,
}

pub struct SectionRow {
    pub id: i64,
    pub slug: String,
    pub section: Section,
}

/// Store a document and its sections, replacing any document with the same slug.
pub fn save_document(conn: &Connection, title: &str, sections: &[Section]) -> Result<DocumentRow> {
    let slug = slugify(title);
    anyhow::ensure!(!slug.is_empty(), "document title {:?} yields an empty slug", title);
    let created_at = chrono::Utc::now().to_rfc3339();
    let slugs = section_slugs(sections);

    let tx = conn.unchecked_transaction()?;
    {
        tx.execute("DELETE FROM documents WHERE slug = ?1", [&slug])?;
        tx.execute(
            "INSERT INTO documents (slug, title, section_count, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![slug, title, sections.len(), created_at],
        )?;

        let mut s_stmt = tx.prepare(
            "INSERT INTO sections
             (document_slug, section_order, slug, heading, title, headline, summary, page)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        let mut b_stmt = tx.prepare(
            "INSERT INTO blocks (section_id, block_order, kind, content, page, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (section, section_slug) in sections.iter().zip(&slugs) {
            s_stmt.execute(rusqlite::params![
                slug, section.order, section_slug, section.heading, section.title(),
                section.headline, section.summary, section.page,
            ])?;
            let section_id = tx.last_insert_rowid();
            for b in &section.blocks {
                b_stmt.execute(rusqlite::params![
                    section_id,
                    b.order,
                    b.kind.as_str(),
                    b.content,
                    b.page,
                    serde_json::to_string(&b.metadata)?,
                ])?;
            }
        }
    }
    tx.commit()?;

    Ok(DocumentRow {
        slug,
        title: title.to_string(),
        section_count: sections.len(),
        created_at,
    })
}

pub fn fetch_document(conn: &Connection, slug: &str) -> Result<Option<DocumentRow>> {
    let row = conn
        .query_row(
            "SELECT slug, title, section_count, created_at FROM documents WHERE slug = ?1",
            [slug],
            |row| {
                Ok(DocumentRow {
                    slug: row.get(0)?,
                    title: row.get(1)?,
                    section_count: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn list_documents(conn: &Connection) -> Result<Vec<DocumentRow>> {
    let mut stmt = conn.prepare(
        "SELECT slug, title, section_count, created_at FROM documents ORDER BY created_at DESC, slug",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(DocumentRow {
                slug: row.get(0)?,
                title: row.get(1)?,
                section_count: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const SECTION_COLUMNS: &str =
    "id, slug, section_order, heading, headline, summary, page";

fn section_from_row(row: &rusqlite::Row) -> rusqlite::Result<SectionRow> {
    Ok(SectionRow {
        id: row.get(0)?,
        slug: row.get(1)?,
        section: Section {
            order: row.get(2)?,
            heading: row.get(3)?,
            headline: row.get(4)?,
            summary: row.get(5)?,
            page: row.get(6)?,
            blocks: Vec::new(),
        },
    })
}

fn load_blocks(conn: &Connection, row: &mut SectionRow) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT block_order, kind, content, page, metadata
         FROM blocks WHERE section_id = ?1 ORDER BY block_order",
    )?;
    let raw = stmt
        .query_map([row.id], |r| {
            Ok((
                r.get::<_, usize>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, u32>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    row.section.blocks = raw
        .into_iter()
        .map(|(order, kind, content, page, metadata)| -> Result<Block> {
            let kind = BlockKind::parse(&kind)
                .with_context(|| format!("unknown block kind {:?} in section {}", kind, row.id))?;
            let metadata: Map<String, Value> = serde_json::from_str(&metadata)
                .with_context(|| format!("bad metadata in section {}", row.id))?;
            Ok(Block {
                kind,
                content,
                order,
                page,
                bbox: None,
                metadata,
                payload: Vec::new(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(())
}

/// All sections of a document in order, with their blocks.
pub fn fetch_sections(conn: &Connection, document_slug: &str) -> Result<Vec<SectionRow>> {
    let sql = format!(
        "SELECT {} FROM sections WHERE document_slug = ?1 ORDER BY section_order",
        SECTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map([document_slug], section_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for row in &mut rows {
        load_blocks(conn, row)?;
    }
    Ok(rows)
}

pub fn fetch_section_by_order(
    conn: &Connection,
    document_slug: &str,
    order: usize,
) -> Result<Option<SectionRow>> {
    let sql = format!(
        "SELECT {} FROM sections WHERE document_slug = ?1 AND section_order = ?2",
        SECTION_COLUMNS
    );
    let row = conn
        .query_row(&sql, rusqlite::params![document_slug, order], section_from_row)
        .optional()?;
    with_blocks(conn, row)
}

pub fn fetch_section_by_slug(
    conn: &Connection,
    document_slug: &str,
    section_slug: &str,
) -> Result<Option<SectionRow>> {
    let sql = format!(
        "SELECT {} FROM sections WHERE document_slug = ?1 AND slug = ?2",
        SECTION_COLUMNS
    );
    let row = conn
        .query_row(&sql, rusqlite::params![document_slug, section_slug], section_from_row)
        .optional()?;
    with_blocks(conn, row)
}

fn with_blocks(conn: &Connection, row: Option<SectionRow>) -> Result<Option<SectionRow>> {
    match row {
        Some(mut row) => {
            load_blocks(conn, &mut row)?;
            Ok(Some(row))
        }
        None => Ok(None),
    }
}

// ── Stats ──

pub struct Stats {
    pub documents: usize,
    pub sections: usize,
    pub text_blocks: usize,
    pub image_blocks: usize,
    pub table_blocks: usize,
    pub summarized: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(Stats {
        documents: count("SELECT COUNT(*) FROM documents")?,
        sections: count("SELECT COUNT(*) FROM sections")?,
        text_blocks: count("SELECT COUNT(*) FROM blocks WHERE kind = 'text'")?,
        image_blocks: count("SELECT COUNT(*) FROM blocks WHERE kind = 'image'")?,
        table_blocks: count("SELECT COUNT(*) FROM blocks WHERE kind = 'table'")?,
        summarized: count("SELECT COUNT(*) FROM sections WHERE summary IS NOT NULL")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RawExtractionRecord;
    use serde_json::json;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn section(order: usize, heading: &str) -> Section {
        let mut image = Block::from_asset_record(RawExtractionRecord::image(4, 0.0, vec![], "png")).unwrap();
        image.content = "page_4_img_1.png".into();
        image.metadata.insert("tags".into(), json!(["wiring", "diagram"]));
        let mut s = Section {
            order,
            heading: heading.into(),
            page: 4,
            blocks: vec![
                Block::text("First paragraph.".into(), 4),
                image,
                Block::text("Second paragraph.".into(), 5),
            ],
            headline: Some(format!("Headline {order}")),
            summary: None,
        };
        s.renumber();
        s
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("1. Introduction"), "1-introduction");
        assert_eq!(slugify("  Safety -- Procedures! "), "safety-procedures");
        assert_eq!(slugify("Électricité"), "lectricit");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn duplicate_section_titles_get_suffixes() {
        let sections = vec![section(0, "1. Overview"), section(1, "OVERVIEW"), section(2, "2. Overview"), section(3, "3. ???")];
        assert_eq!(section_slugs(&sections), vec!["overview", "overview-2", "overview-3", "section-3"]);
    }

    #[test]
    fn save_and_fetch_round_trip() {
        let conn = memory_db();
        let sections = vec![section(0, "1. Introduction"), section(1, "2. Wiring Basics")];
        let doc = save_document(&conn, "Electrician Handbook", &sections).unwrap();
        assert_eq!(doc.slug, "electrician-handbook");
        assert_eq!(doc.section_count, 2);

        let stored = fetch_document(&conn, "electrician-handbook").unwrap().unwrap();
        assert_eq!(stored.title, "Electrician Handbook");
        assert_eq!(stored.section_count, 2);

        let rows = fetch_sections(&conn, "electrician-handbook").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].slug, "wiring-basics");
        assert_eq!(rows[0].section.blocks, sections[0].blocks.iter().cloned().map(|mut b| {
            b.bbox = None;
            b
        }).collect::<Vec<_>>());
        assert_eq!(rows[0].section.headline.as_deref(), Some("Headline 0"));
    }

    #[test]
    fn lookup_by_order_and_slug() {
        let conn = memory_db();
        save_document(&conn, "Handbook", &[section(0, "1. Introduction"), section(1, "2. Scope")]).unwrap();

        let by_order = fetch_section_by_order(&conn, "handbook", 1).unwrap().unwrap();
        assert_eq!(by_order.section.heading, "2. Scope");
        assert_eq!(by_order.section.blocks.len(), 3);

        let by_slug = fetch_section_by_slug(&conn, "handbook", "introduction").unwrap().unwrap();
        assert_eq!(by_slug.section.order, 0);
        assert_eq!(by_slug.section.blocks[1].content, "page_4_img_1.png");
        assert_eq!(by_slug.section.blocks[1].metadata["tags"], json!(["wiring", "diagram"]));

        assert!(fetch_section_by_order(&conn, "handbook", 7).unwrap().is_none());
        assert!(fetch_section_by_slug(&conn, "other", "introduction").unwrap().is_none());
    }

    #[test]
    fn resave_replaces_document() {
        let conn = memory_db();
        save_document(&conn, "Handbook", &[section(0, "1. A"), section(1, "2. B")]).unwrap();
        save_document(&conn, "Handbook", &[section(0, "1. C")]).unwrap();

        let rows = fetch_sections(&conn, "handbook").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].section.heading, "1. C");
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.sections, 1);
        assert_eq!(stats.text_blocks, 2);
        assert_eq!(stats.image_blocks, 1);
        assert_eq!(stats.table_blocks, 0);
        assert_eq!(stats.summarized, 0);
        assert_eq!(list_documents(&conn).unwrap().len(), 1);
    }

    #[test]
    fn empty_title_rejected() {
        let conn = memory_db();
        assert!(save_document(&conn, "???", &[]).is_err());
    }
}

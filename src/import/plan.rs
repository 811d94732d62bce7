//! Record-kind configuration.
//!
//! A [`LoadPlan`] describes everything the loader needs to know about one
//! input kind: how wide its rows are, which cells feed the primary table and
//! how list-valued cells expand into child tables. Each target table carries
//! a [`TableSpec`] with its columns, conflict key and generated insert SQL.
//!
//! The four plans used by the dataset loader are built by [`users_plan`],
//! [`user_relations_plan`], [`recipes_plan`] and [`reviews_plan`].

use crate::normalize::{FieldKind, MAX_LIST_ITEM_LEN, Value, normalize};
use crate::shaper::{ChildKind, ChildRole, ShapedRow, extract_sublists};

/// Cap for short free-text columns (names, categories, durations).
pub const SHORT_TEXT_LEN: usize = 200;
/// Cap for long free-text columns (descriptions, review bodies).
pub const LONG_TEXT_LEN: usize = 4000;

/// Storage type of a column, mapped to a typed array for UNNEST binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Timestamp,
}

impl ColumnType {
    /// PostgreSQL array type used in the UNNEST cast.
    pub fn array_type(self) -> &'static str {
        match self {
            ColumnType::Integer => "int[]",
            ColumnType::Real => "float8[]",
            ColumnType::Text => "text[]",
            ColumnType::Timestamp => "timestamptz[]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub column_type: ColumnType,
}

/// Drop rows whose `column` has no matching `key` in `table`.
///
/// Used for relation edges that point at users which may not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub column: &'static str,
    pub table: &'static str,
    pub key: &'static str,
}

/// One target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: Vec<ColumnSpec>,
    /// Columns of the unique constraint used for `ON CONFLICT DO NOTHING`.
    pub conflict_key: Vec<&'static str>,
    pub references: Vec<Reference>,
    pub insert_sql: String,
}

impl TableSpec {
    pub fn new(
        name: &'static str,
        columns: Vec<ColumnSpec>,
        conflict_key: Vec<&'static str>,
        references: Vec<Reference>,
    ) -> Self {
        let insert_sql = build_insert_sql(name, &columns, &conflict_key, &references);
        Self {
            name,
            columns,
            conflict_key,
            references,
            insert_sql,
        }
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }
}

/// Generate the columnar insert for a table.
///
/// All rows of a flush are sent as one typed array per column and expanded
/// server side with `UNNEST`. Conflicting rows are skipped, and rows that
/// fail a reference check are filtered before insert.
fn build_insert_sql(
    table: &str,
    columns: &[ColumnSpec],
    conflict_key: &[&str],
    references: &[Reference],
) -> String {
    let names: Vec<&str> = columns.iter().map(|column| column.name).collect();
    let selected: Vec<String> = names.iter().map(|name| format!("t.{name}")).collect();
    let arrays: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("${}::{}", idx + 1, column.column_type.array_type()))
        .collect();

    let mut sql = format!(
        "INSERT INTO {table} ({}) SELECT {} FROM UNNEST({}) AS t ({})",
        names.join(", "),
        selected.join(", "),
        arrays.join(", "),
        names.join(", "),
    );

    let filters: Vec<String> = references
        .iter()
        .map(|reference| {
            format!(
                "EXISTS (SELECT 1 FROM {} r WHERE r.{} = t.{})",
                reference.table, reference.key, reference.column
            )
        })
        .collect();
    if !filters.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&filters.join(" AND "));
    }

    if conflict_key.is_empty() {
        sql.push_str(" ON CONFLICT DO NOTHING");
    } else {
        sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", conflict_key.join(", ")));
    }

    sql
}

/// Source cell and normalization for one primary-table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub source: usize,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryTable {
    pub table: TableSpec,
    /// One entry per table column, in column order.
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildTable {
    pub role: ChildRole,
    pub table: TableSpec,
}

/// Normalized rows destined for each table of a plan, for one input row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRows {
    pub id: i64,
    /// Indexed like [`LoadPlan::tables`].
    pub tables: Vec<Vec<Vec<Value>>>,
}

/// Everything needed to load one record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub name: &'static str,
    pub expected_columns: usize,
    pub primary: Option<PrimaryTable>,
    pub children: Vec<ChildTable>,
}

impl LoadPlan {
    /// Target tables in write order: the primary table first, then children.
    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.primary
            .iter()
            .map(|primary| &primary.table)
            .chain(self.children.iter().map(|child| &child.table))
    }

    pub fn table_count(&self) -> usize {
        usize::from(self.primary.is_some()) + self.children.len()
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables().map(|table| table.name).collect()
    }

    /// Normalize one shaped row into per-table rows.
    ///
    /// Returns `None` when the row has no usable primary key.
    pub fn build_records(&self, row: &ShapedRow) -> Option<RecordRows> {
        let roles: Vec<ChildRole> = self.children.iter().map(|child| child.role.clone()).collect();
        let extracted = extract_sublists(row, &roles)?;

        let mut tables = Vec::with_capacity(self.table_count());
        if let Some(primary) = &self.primary {
            let values = primary
                .fields
                .iter()
                .map(|field| normalize(row.cell(field.source), field.kind))
                .collect();
            tables.push(vec![values]);
        }
        tables.extend(extracted.children.into_iter().map(|child| child.rows));

        Some(RecordRows {
            id: extracted.id,
            tables,
        })
    }
}

fn column(name: &'static str, column_type: ColumnType) -> ColumnSpec {
    ColumnSpec { name, column_type }
}

fn field(source: usize, kind: FieldKind) -> FieldSpec {
    FieldSpec { source, kind }
}

fn short_text() -> FieldKind {
    FieldKind::Text {
        max_len: SHORT_TEXT_LEN,
    }
}

fn long_text() -> FieldKind {
    FieldKind::Text {
        max_len: LONG_TEXT_LEN,
    }
}

fn user_reference(column: &'static str) -> Reference {
    Reference {
        column,
        table: "users",
        key: "author_id",
    }
}

fn primary_table(
    name: &'static str,
    conflict_key: Vec<&'static str>,
    spec: Vec<(&'static str, FieldSpec)>,
) -> PrimaryTable {
    let columns = spec
        .iter()
        .map(|(column_name, field)| column(column_name, column_type_of(field.kind)))
        .collect();
    let fields = spec.into_iter().map(|(_, field)| field).collect();
    PrimaryTable {
        table: TableSpec::new(name, columns, conflict_key, Vec::new()),
        fields,
    }
}

fn column_type_of(kind: FieldKind) -> ColumnType {
    match kind {
        FieldKind::Integer => ColumnType::Integer,
        FieldKind::Real => ColumnType::Real,
        FieldKind::Timestamp => ColumnType::Timestamp,
        FieldKind::Text { .. } | FieldKind::List => ColumnType::Text,
    }
}

/// `(parent_id, other_id)` edge table filtered against `users`.
fn edge_table(
    name: &'static str,
    parent: &'static str,
    other: &'static str,
    source: usize,
    exclude_self: bool,
    references: Vec<Reference>,
) -> ChildTable {
    ChildTable {
        role: ChildRole {
            table: name,
            column: source,
            kind: ChildKind::Ids { exclude_self },
            max_item_len: MAX_LIST_ITEM_LEN,
        },
        table: TableSpec::new(
            name,
            vec![column(parent, ColumnType::Integer), column(other, ColumnType::Integer)],
            vec![parent, other],
            references,
        ),
    }
}

/// `(parent_id, text)` table with one row per list item.
fn item_table(name: &'static str, parent: &'static str, text: &'static str, source: usize) -> ChildTable {
    ChildTable {
        role: ChildRole {
            table: name,
            column: source,
            kind: ChildKind::Items,
            max_item_len: MAX_LIST_ITEM_LEN,
        },
        table: TableSpec::new(
            name,
            vec![column(parent, ColumnType::Integer), column(text, ColumnType::Text)],
            vec![parent, text],
            Vec::new(),
        ),
    }
}

/// User profiles: `author_id, author_name, gender, age, followers_count,
/// following_count, followers, following`.
pub fn users_plan() -> LoadPlan {
    LoadPlan {
        name: "users",
        expected_columns: 8,
        primary: Some(primary_table(
            "users",
            vec!["author_id"],
            vec![
                ("author_id", field(0, FieldKind::Integer)),
                ("author_name", field(1, FieldKind::Text { max_len: 100 })),
                ("gender", field(2, FieldKind::Text { max_len: 10 })),
                ("age", field(3, FieldKind::Integer)),
                ("followers_count", field(4, FieldKind::Integer)),
                ("following_count", field(5, FieldKind::Integer)),
            ],
        )),
        children: Vec::new(),
    }
}

/// Follower and following edges from the user export.
///
/// Runs after [`users_plan`] so both endpoints can be checked against the
/// loaded users.
pub fn user_relations_plan() -> LoadPlan {
    LoadPlan {
        name: "user_relations",
        expected_columns: 8,
        primary: None,
        children: vec![
            edge_table(
                "user_followers",
                "user_id",
                "follower_id",
                6,
                true,
                vec![user_reference("user_id"), user_reference("follower_id")],
            ),
            edge_table(
                "user_following",
                "user_id",
                "following_id",
                7,
                true,
                vec![user_reference("user_id"), user_reference("following_id")],
            ),
        ],
    }
}

/// Recipes with keywords, ingredients, instruction steps and favorites.
pub fn recipes_plan() -> LoadPlan {
    LoadPlan {
        name: "recipes",
        expected_columns: 27,
        primary: Some(primary_table(
            "recipes",
            vec!["recipe_id"],
            vec![
                ("recipe_id", field(0, FieldKind::Integer)),
                ("recipe_name", field(1, short_text())),
                ("author_id", field(2, FieldKind::Integer)),
                ("cook_time", field(4, short_text())),
                ("prep_time", field(5, short_text())),
                ("total_time", field(6, short_text())),
                ("date_published", field(7, FieldKind::Timestamp)),
                ("description", field(8, long_text())),
                ("recipe_category", field(9, short_text())),
                ("aggregated_rating", field(12, FieldKind::Real)),
                ("review_count", field(13, FieldKind::Integer)),
                ("calories", field(14, FieldKind::Real)),
                ("fat_content", field(15, FieldKind::Real)),
                ("saturated_fat_content", field(16, FieldKind::Real)),
                ("cholesterol_content", field(17, FieldKind::Real)),
                ("sodium_content", field(18, FieldKind::Real)),
                ("carbohydrate_content", field(19, FieldKind::Real)),
                ("fiber_content", field(20, FieldKind::Real)),
                ("sugar_content", field(21, FieldKind::Real)),
                ("protein_content", field(22, FieldKind::Real)),
                ("recipe_servings", field(23, FieldKind::Real)),
                ("recipe_yield", field(24, short_text())),
            ],
        )),
        children: vec![
            item_table("keywords", "recipe_id", "keyword_text", 10),
            item_table("recipe_ingredients", "recipe_id", "ingredient_text", 11),
            ChildTable {
                role: ChildRole {
                    table: "recipe_instructions",
                    column: 25,
                    kind: ChildKind::Steps,
                    max_item_len: LONG_TEXT_LEN,
                },
                table: TableSpec::new(
                    "recipe_instructions",
                    vec![
                        column("recipe_id", ColumnType::Integer),
                        column("step_order", ColumnType::Integer),
                        column("instruction_text", ColumnType::Text),
                    ],
                    vec!["recipe_id", "step_order"],
                    Vec::new(),
                ),
            },
            edge_table(
                "recipe_favorites",
                "recipe_id",
                "user_id",
                26,
                false,
                vec![user_reference("user_id")],
            ),
        ],
    }
}

/// Reviews and their likers. Column 3 holds the author name, which is not
/// stored.
pub fn reviews_plan() -> LoadPlan {
    LoadPlan {
        name: "reviews",
        expected_columns: 9,
        primary: Some(primary_table(
            "reviews",
            vec!["review_id"],
            vec![
                ("review_id", field(0, FieldKind::Integer)),
                ("recipe_id", field(1, FieldKind::Integer)),
                ("author_id", field(2, FieldKind::Integer)),
                ("rating", field(4, FieldKind::Integer)),
                ("review_content", field(5, long_text())),
                ("date_submitted", field(6, FieldKind::Timestamp)),
                ("date_modified", field(7, FieldKind::Timestamp)),
            ],
        )),
        children: vec![edge_table(
            "review_likers",
            "review_id",
            "liker_id",
            8,
            false,
            vec![user_reference("liker_id")],
        )],
    }
}

//! Table blueprints
//!
//! A [`TableBuilder`] collects the columns, keys, indexes and alterations the
//! caller declares inside a `create_table` or `alter_table` closure. It never
//! touches the database; the compiler turns it into statements.

use serde::Serialize;

use super::column::{ColumnDescriptor, ColumnType};

/// Whether a blueprint creates a new table or alters an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableIntent {
    Create,
    Alter,
}

/// Foreign key referential action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// Index declared on a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDefinition {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Foreign key constraint declared on a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDefinition {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

impl ForeignKeyDefinition {
    /// Referenced table and columns
    pub fn references(&mut self, table: impl Into<String>, column: impl Into<String>) -> &mut Self {
        self.references_table = table.into();
        self.references_columns = vec![column.into()];
        self
    }

    /// Referenced table and several columns
    pub fn references_many(&mut self, table: impl Into<String>, columns: &[&str]) -> &mut Self {
        self.references_table = table.into();
        self.references_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn on_delete(&mut self, action: ReferentialAction) -> &mut Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(&mut self, action: ReferentialAction) -> &mut Self {
        self.on_update = Some(action);
        self
    }

    /// Override the generated constraint name
    pub fn named(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }
}

/// One declared change, kept in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableCommand {
    /// Index into [`TableBuilder::columns`]
    AddColumn(usize),
    /// Index into [`TableBuilder::columns`]
    ModifyColumn(usize),
    DropColumn(String),
    RenameColumn { from: String, to: String },
    /// Index into [`TableBuilder::indexes`]
    AddIndex(usize),
    DropIndex(String),
    AddPrimaryKey(Vec<String>),
    AddUnique(Vec<String>),
    /// Index into [`TableBuilder::foreign_keys`]
    AddForeignKey(usize),
    DropConstraint(String),
    SetComment(String),
}

/// Declarative description of a table creation or alteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableBuilder {
    name: String,
    intent: TableIntent,
    columns: Vec<ColumnDescriptor>,
    indexes: Vec<IndexDefinition>,
    foreign_keys: Vec<ForeignKeyDefinition>,
    commands: Vec<TableCommand>,
}

impl TableBuilder {
    /// Blueprint for a new table
    pub fn create(name: impl Into<String>) -> Self {
        Self::with_intent(name, TableIntent::Create)
    }

    /// Blueprint for changes to an existing table
    pub fn alter(name: impl Into<String>) -> Self {
        Self::with_intent(name, TableIntent::Alter)
    }

    fn with_intent(name: impl Into<String>, intent: TableIntent) -> Self {
        Self {
            name: name.into(),
            intent,
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intent(&self) -> TableIntent {
        self.intent
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn foreign_keys(&self) -> &[ForeignKeyDefinition] {
        &self.foreign_keys
    }

    pub fn commands(&self) -> &[TableCommand] {
        &self.commands
    }

    /// Columns added by this blueprint, in declaration order
    pub fn added_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.commands.iter().filter_map(move |command| match command {
            TableCommand::AddColumn(index) => self.columns.get(*index),
            _ => None,
        })
    }

    /// Add a column of any type
    pub fn column(&mut self, name: impl Into<String>, column_type: ColumnType) -> &mut ColumnDescriptor {
        self.push_column(ColumnDescriptor::new(name, column_type), false)
    }

    /// Change the type and modifiers of an existing column
    pub fn change_column(&mut self, name: impl Into<String>, column_type: ColumnType) -> &mut ColumnDescriptor {
        self.push_column(ColumnDescriptor::new(name, column_type), true)
    }

    fn push_column(&mut self, column: ColumnDescriptor, modify: bool) -> &mut ColumnDescriptor {
        let index = self.columns.len();
        self.columns.push(column);
        self.commands.push(if modify {
            TableCommand::ModifyColumn(index)
        } else {
            TableCommand::AddColumn(index)
        });
        &mut self.columns[index]
    }

    /// Auto-incrementing BIGINT primary key
    pub fn id(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.big_increments(name).primary()
    }

    pub fn increments(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Serial)
    }

    pub fn big_increments(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::BigSerial)
    }

    pub fn small_integer(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::SmallInt)
    }

    pub fn integer(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::BigInt)
    }

    pub fn real(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Real)
    }

    pub fn double(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Double)
    }

    pub fn decimal(&mut self, name: impl Into<String>, precision: u32, scale: u32) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Decimal { precision, scale })
    }

    pub fn char(&mut self, name: impl Into<String>, length: Option<u32>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Char(length))
    }

    /// VARCHAR with a length, TEXT without
    pub fn string(&mut self, name: impl Into<String>, length: Option<u32>) -> &mut ColumnDescriptor {
        match length {
            Some(len) => self.column(name, ColumnType::Varchar(Some(len))),
            None => self.column(name, ColumnType::Text),
        }
    }

    pub fn text(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Text)
    }

    pub fn boolean(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Boolean)
    }

    pub fn date(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Date)
    }

    pub fn time(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Time)
    }

    pub fn timestamp(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Timestamp)
    }

    pub fn timestamp_tz(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::TimestampTz)
    }

    pub fn interval(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Interval)
    }

    pub fn binary(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Binary)
    }

    pub fn json(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Json)
    }

    pub fn jsonb(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Jsonb)
    }

    pub fn inet(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Inet)
    }

    pub fn cidr(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Cidr)
    }

    pub fn mac_address(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::MacAddr)
    }

    pub fn uuid(&mut self, name: impl Into<String>) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Uuid)
    }

    pub fn array(&mut self, name: impl Into<String>, element: ColumnType) -> &mut ColumnDescriptor {
        self.column(name, ColumnType::Array(Box::new(element)))
    }

    /// `created_at` and `updated_at`, both NOT NULL with a CURRENT_TIMESTAMP default
    pub fn timestamps(&mut self) {
        self.timestamp_tz("created_at").not_null().default_raw("CURRENT_TIMESTAMP");
        self.timestamp_tz("updated_at").not_null().default_raw("CURRENT_TIMESTAMP");
    }

    /// Composite primary key
    pub fn primary(&mut self, columns: &[&str]) {
        self.commands.push(TableCommand::AddPrimaryKey(to_owned(columns)));
    }

    /// Multi-column unique constraint
    pub fn unique(&mut self, columns: &[&str]) {
        self.commands.push(TableCommand::AddUnique(to_owned(columns)));
    }

    /// Plain index with a generated name
    pub fn index(&mut self, columns: &[&str]) -> &mut IndexDefinition {
        self.push_index(None, columns, false)
    }

    /// Unique index with a generated name
    pub fn unique_index(&mut self, columns: &[&str]) -> &mut IndexDefinition {
        self.push_index(None, columns, true)
    }

    /// Index with an explicit name
    pub fn index_named(&mut self, name: impl Into<String>, columns: &[&str], unique: bool) -> &mut IndexDefinition {
        self.push_index(Some(name.into()), columns, unique)
    }

    fn push_index(&mut self, name: Option<String>, columns: &[&str], unique: bool) -> &mut IndexDefinition {
        let index = self.indexes.len();
        self.indexes.push(IndexDefinition {
            name,
            columns: to_owned(columns),
            unique,
        });
        self.commands.push(TableCommand::AddIndex(index));
        &mut self.indexes[index]
    }

    /// Foreign key on a single column; complete it with `references`
    pub fn foreign(&mut self, column: impl Into<String>) -> &mut ForeignKeyDefinition {
        let index = self.foreign_keys.len();
        self.foreign_keys.push(ForeignKeyDefinition {
            name: None,
            columns: vec![column.into()],
            references_table: String::new(),
            references_columns: Vec::new(),
            on_delete: None,
            on_update: None,
        });
        self.commands.push(TableCommand::AddForeignKey(index));
        &mut self.foreign_keys[index]
    }

    /// Table comment
    pub fn comment(&mut self, text: impl Into<String>) {
        self.commands.push(TableCommand::SetComment(text.into()));
    }

    pub fn drop_column(&mut self, name: impl Into<String>) {
        self.commands.push(TableCommand::DropColumn(name.into()));
    }

    pub fn rename_column(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.commands.push(TableCommand::RenameColumn {
            from: from.into(),
            to: to.into(),
        });
    }

    pub fn drop_index(&mut self, name: impl Into<String>) {
        self.commands.push(TableCommand::DropIndex(name.into()));
    }

    pub fn drop_foreign(&mut self, name: impl Into<String>) {
        self.drop_constraint(name);
    }

    pub fn drop_constraint(&mut self, name: impl Into<String>) {
        self.commands.push(TableCommand::DropConstraint(name.into()));
    }
}

fn to_owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_keep_declaration_order() {
        let mut table = TableBuilder::alter("users");
        table.string("phone", Some(32));
        table.drop_column("legacy");
        table.rename_column("name", "full_name");
        table.index(&["phone"]);

        assert_eq!(
            table.commands(),
            &[
                TableCommand::AddColumn(0),
                TableCommand::DropColumn("legacy".to_string()),
                TableCommand::RenameColumn {
                    from: "name".to_string(),
                    to: "full_name".to_string()
                },
                TableCommand::AddIndex(0),
            ]
        );
    }

    #[test]
    fn test_column_helpers() {
        let mut table = TableBuilder::create("users");
        table.id("id");
        table.string("name", Some(255)).not_null();
        table.string("bio", None);
        table.timestamps();

        let columns = table.columns();
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[0].column_type(), &ColumnType::BigSerial);
        assert!(columns[0].is_primary());
        assert_eq!(columns[1].column_type(), &ColumnType::Varchar(Some(255)));
        assert!(!columns[1].is_nullable());
        assert_eq!(columns[2].column_type(), &ColumnType::Text);
        assert_eq!(columns[3].name(), "created_at");
        assert_eq!(table.added_columns().count(), 5);
    }

    #[test]
    fn test_foreign_key_declaration() {
        let mut table = TableBuilder::create("posts");
        table.big_integer("user_id").not_null();
        table
            .foreign("user_id")
            .references("users", "id")
            .on_delete(ReferentialAction::Cascade);

        let fk = &table.foreign_keys()[0];
        assert_eq!(fk.references_table, "users");
        assert_eq!(fk.references_columns, vec!["id".to_string()]);
        assert_eq!(fk.on_delete, Some(ReferentialAction::Cascade));
        assert_eq!(fk.on_update, None);
    }
}

//! Shared test harness: an in-memory adapter with canned per-table rows and
//! a blog-shaped fixture schema (users, posts, comments, tags, images).

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use trellis::prelude::*;

/// Adapter double. SELECTs answer from queued result sets first, then from
/// canned rows keyed by the `FROM "table"` name; every statement is logged so
/// tests can assert on query counts and compiled SQL.
pub struct MockAdapter {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    queued: Mutex<VecDeque<Vec<Row>>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
    selects: AtomicUsize,
    next_id: AtomicI64,
    notifier: ChangeNotifier,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            queued: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            selects: AtomicUsize::new(0),
            next_id: AtomicI64::new(1),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }

    /// Queues a result set consumed by the next SELECT, ahead of any canned
    /// table rows.
    pub fn queue(&self, rows: Vec<Row>) {
        self.queued.lock().unwrap().push_back(rows);
    }

    pub fn log(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().unwrap().clone()
    }

    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.selects.store(0, Ordering::SeqCst);
        self.log.lock().unwrap().clear();
    }

    fn record(&self, sql: &str, bindings: &[Value]) {
        self.log
            .lock()
            .unwrap()
            .push((sql.to_string(), bindings.to_vec()));
    }

    fn table_of(sql: &str) -> Option<String> {
        let start = sql.find("FROM \"")? + "FROM \"".len();
        let rest = &sql[start..];
        let end = rest.find('"')?;
        Some(rest[..end].to_string())
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn get_all(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, bindings);
        self.selects.fetch_add(1, Ordering::SeqCst);
        if let Some(rows) = self.queued.lock().unwrap().pop_front() {
            return Ok(rows);
        }
        let table = match Self::table_of(sql) {
            Some(table) => table,
            None => return Ok(Vec::new()),
        };
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default())
    }

    async fn execute(&self, _table: &str, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.record(sql, bindings);
        Ok(1)
    }

    async fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<Value> {
        let rendered = values
            .iter()
            .map(|(column, _)| column.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.record(&format!("INSERT INTO \"{table}\" ({rendered})"), &[]);
        Ok(Value::Integer(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin(&self) -> Result<()> {
        self.record("BEGIN", &[]);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.record("COMMIT", &[]);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.record("ROLLBACK", &[]);
        Ok(())
    }

    fn notifier(&self) -> Option<&ChangeNotifier> {
        Some(&self.notifier)
    }
}

pub fn mock_db() -> (Db, Arc<MockAdapter>) {
    let adapter = Arc::new(MockAdapter::new());
    let db = Db::new(adapter.clone(), Arc::new(SqliteGrammar));
    (db, adapter)
}

pub fn row<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    pairs.into_iter().collect()
}

pub fn morph_registry() -> MorphRegistry {
    MorphRegistry::new().register::<User>().register::<Post>()
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub role: String,
    pub age: i64,
}

impl Model for User {
    const TABLE: &'static str = "users";

    fn from_row(r: &Row) -> Result<Self> {
        Ok(Self {
            id: r.get_i64("id")?,
            name: r.get_string("name")?,
            role: r.get_string("role")?,
            age: r.get_opt_i64("age").unwrap_or_default(),
        })
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "role" => Some(self.role.as_str().into()),
            "age" => Some(self.age.into()),
            _ => None,
        }
    }

    fn relation(&self, db: &Db, name: &str) -> Option<DynRelation> {
        match name {
            "posts" => Some(Box::new(HasMany::<User, Post>::new(db, self, "user_id", "id"))),
            "comments" => Some(Box::new(HasManyThrough::<User, Post, Comment>::new(
                db, self, "user_id", "post_id", "id", "id",
            ))),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Post {
    pub id: i64,
    pub user_id: Option<i64>,
    pub title: String,
}

impl Model for Post {
    const TABLE: &'static str = "posts";

    fn from_row(r: &Row) -> Result<Self> {
        Ok(Self {
            id: r.get_i64("id")?,
            user_id: r.get_opt_i64("user_id"),
            title: r.get_string("title")?,
        })
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            "user_id" => Some(self.user_id.into()),
            "title" => Some(self.title.as_str().into()),
            _ => None,
        }
    }

    fn relation(&self, db: &Db, name: &str) -> Option<DynRelation> {
        match name {
            "author" => Some(Box::new(BelongsTo::<Post, User>::new(db, self, "user_id", "id"))),
            "comments" => Some(Box::new(HasMany::<Post, Comment>::new(
                db, self, "post_id", "id",
            ))),
            "tags" => Some(Box::new(BelongsToMany::<Post, Tag>::new(
                db, self, "post_tag", "post_id", "tag_id", "id", "id",
            ))),
            "labels" => Some(Box::new(MorphToMany::<Post, Tag>::new(
                db, self, "labelable", "labelables", "tag_id", "id", "id",
            ))),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
}

impl Model for Comment {
    const TABLE: &'static str = "comments";

    fn from_row(r: &Row) -> Result<Self> {
        Ok(Self {
            id: r.get_i64("id")?,
            post_id: r.get_i64("post_id")?,
            body: r.get_string("body")?,
        })
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            "post_id" => Some(self.post_id.into()),
            "body" => Some(self.body.as_str().into()),
            _ => None,
        }
    }

    fn relation(&self, db: &Db, name: &str) -> Option<DynRelation> {
        match name {
            "post" => Some(Box::new(BelongsTo::<Comment, Post>::new(
                db, self, "post_id", "id",
            ))),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl Model for Tag {
    const TABLE: &'static str = "tags";

    fn from_row(r: &Row) -> Result<Self> {
        Ok(Self {
            id: r.get_i64("id")?,
            name: r.get_string("name")?,
        })
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Image {
    pub id: i64,
    pub url: String,
    pub imageable_type: Option<String>,
    pub imageable_id: Option<i64>,
}

impl Model for Image {
    const TABLE: &'static str = "images";

    fn from_row(r: &Row) -> Result<Self> {
        Ok(Self {
            id: r.get_i64("id")?,
            url: r.get_string("url")?,
            imageable_type: r.get_opt_string("imageable_type"),
            imageable_id: r.get_opt_i64("imageable_id"),
        })
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            "url" => Some(self.url.as_str().into()),
            "imageable_type" => Some(self.imageable_type.as_deref().into()),
            "imageable_id" => Some(self.imageable_id.into()),
            _ => None,
        }
    }

    fn relation(&self, db: &Db, name: &str) -> Option<DynRelation> {
        match name {
            "imageable" => Some(Box::new(MorphTo::<Image>::new(
                db,
                self,
                "imageable",
                morph_registry(),
            ))),
            _ => None,
        }
    }
}

pub fn seed_blog(adapter: &MockAdapter) {
    adapter.seed(
        "users",
        vec![
            row([
                ("id", 1.into()),
                ("name", "Ada".into()),
                ("role", "admin".into()),
                ("age", 36.into()),
            ]),
            row([
                ("id", 2.into()),
                ("name", "Lin".into()),
                ("role", "editor".into()),
                ("age", 28.into()),
            ]),
        ],
    );
    adapter.seed(
        "posts",
        vec![
            row([
                ("id", 10.into()),
                ("user_id", 1.into()),
                ("title", "Intro".into()),
            ]),
            row([
                ("id", 11.into()),
                ("user_id", 1.into()),
                ("title", "Part two".into()),
            ]),
            row([
                ("id", 12.into()),
                ("user_id", 2.into()),
                ("title", "Errata".into()),
            ]),
        ],
    );
    adapter.seed(
        "comments",
        vec![
            row([
                ("id", 100.into()),
                ("post_id", 10.into()),
                ("body", "First".into()),
            ]),
            row([
                ("id", 101.into()),
                ("post_id", 10.into()),
                ("body", "Second".into()),
            ]),
            row([
                ("id", 102.into()),
                ("post_id", 12.into()),
                ("body", "Typo in step 3".into()),
            ]),
        ],
    );
    adapter.seed(
        "tags",
        vec![
            row([("id", 7.into()), ("name", "rust".into())]),
            row([("id", 8.into()), ("name", "sql".into())]),
        ],
    );
    adapter.seed(
        "post_tag",
        vec![
            row([("post_id", 10.into()), ("tag_id", 7.into())]),
            row([("post_id", 10.into()), ("tag_id", 8.into())]),
            row([("post_id", 12.into()), ("tag_id", 7.into())]),
        ],
    );
}

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub status: String,
    pub target_units: i64,
    pub pacing_mode: String,
    pub pacing_hours: Option<f64>,
    /// JSON-encoded distribution spec
    #[sea_orm(column_type = "Text", nullable)]
    pub distribution: Option<String>,
    pub concurrency: Option<i32>,
    pub units_per_cohort: i32,
    pub cohort_count: i32,
    /// JSON-encoded job stats
    #[sea_orm(column_type = "Text", nullable)]
    pub stats: Option<String>,
    /// JSON-encoded completion metrics
    #[sea_orm(column_type = "Text", nullable)]
    pub metrics: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub started_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::jobs::Entity")]
    Jobs,
}

impl Related<super::jobs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Jobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

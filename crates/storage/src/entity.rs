pub mod donations {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "donations")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        #[sea_orm(column_type = "Double")]
        pub amount: f64,
        #[sea_orm(column_type = "Double")]
        pub amount_usd: f64,
        pub currency: String,
        pub network: Option<String>,
        pub status: DonationStatusDb,
        pub tx_hash: Option<String>,
        pub confirmations: i32,
        pub metadata: Option<Json>,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub created_at: DateTimeUtc,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub updated_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "String", db_type = "Text")]
    pub enum DonationStatusDb {
        #[sea_orm(string_value = "pending")]
        Pending,
        #[sea_orm(string_value = "completed")]
        Completed,
        #[sea_orm(string_value = "failed")]
        Failed,
        #[sea_orm(string_value = "refunded")]
        Refunded,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

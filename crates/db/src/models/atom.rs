use vdw_core::Bond;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BondRow {
    pub to_id: String,
    pub relation: String,
}

impl BondRow {
    pub fn into_domain(self) -> Bond {
        Bond {
            to: self.to_id,
            relation: self.relation,
        }
    }
}

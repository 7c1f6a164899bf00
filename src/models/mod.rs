mod account;
mod combat;
mod contract;
mod drone;
mod events;
mod faction;
mod first_login;
mod governance;
mod ids;
mod message;
mod planet;
mod player;
mod region;
mod sector;
mod ship;
mod station;
mod team;
mod travel;
mod treaty;

pub use account::*;
pub use combat::*;
pub use contract::*;
pub use drone::*;
pub use events::*;
pub use faction::*;
pub use first_login::*;
pub use governance::*;
pub use ids::*;
pub use message::*;
pub use planet::*;
pub use player::*;
pub use region::*;
pub use sector::*;
pub use ship::*;
pub use station::*;
pub use team::*;
pub use travel::*;
pub use treaty::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(total: u64, page: u32, per_page: u32) -> Pagination {
        let per_page = per_page.max(1);
        let total_pages = (total.div_ceil(per_page as u64)).max(1) as u32;
        Pagination {
            total,
            page,
            per_page,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination::new(0, 1, 20);
        assert_eq!(p.total_pages, 1);
        assert!(!p.has_next);
        assert!(!p.has_prev);

        let p = Pagination::new(41, 2, 20);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(p.has_prev);
    }
}

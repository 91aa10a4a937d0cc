use uuid::Uuid;

/// Time-ordered record id, generated on the device so it is stable before
/// and after the first sync.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_sortable() {
        let a = new_uuid_v7();
        let b = new_uuid_v7();
        assert_ne!(a, b);
        assert!(a < b || a[..13] == b[..13]);
    }
}

use rand::Rng;

/// Generates a process-unique 64-bit identifier. Zero is reserved as the
/// "unassigned" value, so it is never returned.
pub(crate) fn random_id() -> u64 {
    let mut rng = rand::thread_rng();
    loop {
        let id: u64 = rng.gen();
        if id != 0 {
            return id;
        }
    }
}

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};

/// Random string over `[a-zA-Z0-9]`.
pub fn rand_string(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub fn rand_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_string_is_alphanumeric() {
        let s = rand_string(24);
        assert_eq!(s.len(), 24);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(s, rand_string(24));
    }
}

//! Opaque identifier generation.

use rand::Rng;

const HEX: &[u8] = b"0123456789abcdef";
const TOKEN_LEN: usize = 12;

fn token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

pub(crate) fn action_id() -> String {
    format!("ca-{}", token())
}

pub(crate) fn evidence_id() -> String {
    format!("ev-{}", token())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_length() {
        let id = action_id();
        assert!(id.starts_with("ca-"));
        assert_eq!(id.len(), 3 + TOKEN_LEN);
        assert!(evidence_id().starts_with("ev-"));
    }

    #[test]
    fn ids_are_distinct() {
        assert_ne!(action_id(), action_id());
    }
}

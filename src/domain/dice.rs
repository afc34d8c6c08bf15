//! Die geometry helpers.

use crate::domain::models::DieType;

/// Guess the die shape from its LED count.
pub fn estimate_die_type(led_count: u8) -> DieType {
    match led_count {
        4 => DieType::D4,
        6 => DieType::D6,
        8 => DieType::D8,
        10 => DieType::D10,
        12 => DieType::D12,
        20 => DieType::D20,
        21 => DieType::D6Pipped,
        _ => DieType::Unknown,
    }
}

/// Advertised die type, falling back to the LED count when it's not set.
pub fn resolve_die_type(advertised: DieType, led_count: u8) -> DieType {
    match advertised {
        DieType::Unknown => estimate_die_type(led_count),
        known => known,
    }
}

/// Convert an advertised face index to the face value shown on the die.
pub fn face_from_index(face_index: u8, die_type: DieType) -> u8 {
    match die_type {
        // D4 dice are built on a D6 body
        DieType::D4 => match face_index {
            2 => 2,
            3 => 3,
            5 => 4,
            _ => 1,
        },
        DieType::D10 | DieType::Unknown => face_index,
        DieType::D00 => face_index.saturating_mul(10),
        _ => face_index.saturating_add(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_from_led_count() {
        assert_eq!(estimate_die_type(20), DieType::D20);
        assert_eq!(estimate_die_type(21), DieType::D6Pipped);
        assert_eq!(estimate_die_type(0), DieType::Unknown);
        assert_eq!(estimate_die_type(7), DieType::Unknown);
    }

    #[test]
    fn advertised_type_wins() {
        assert_eq!(resolve_die_type(DieType::D00, 10), DieType::D00);
        assert_eq!(resolve_die_type(DieType::Unknown, 10), DieType::D10);
    }

    #[test]
    fn faces() {
        assert_eq!(face_from_index(0, DieType::D20), 1);
        assert_eq!(face_from_index(19, DieType::D20), 20);
        assert_eq!(face_from_index(0, DieType::D10), 0);
        assert_eq!(face_from_index(7, DieType::D00), 70);
        assert_eq!(face_from_index(5, DieType::D4), 4);
        assert_eq!(face_from_index(0, DieType::D4), 1);
        assert_eq!(face_from_index(4, DieType::Unknown), 4);
    }
}

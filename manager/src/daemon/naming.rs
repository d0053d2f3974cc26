/// Daemon-visible name for an instance. The mapping is reversible with
/// [`instance_id_from_process_name`] as long as the prefix is known.
pub fn process_name(prefix: &str, instance_id: &str) -> String {
    format!("{}-{}", prefix, instance_id)
}

pub fn instance_id_from_process_name<'a>(prefix: &str, name: &'a str) -> Option<&'a str> {
    name.strip_prefix(prefix)?
        .strip_prefix('-')
        .filter(|id| !id.is_empty())
}

/// Name the trading engine reports itself under.
pub fn engine_bot_name(instance_id: &str) -> String {
    format!("ft_{}", instance_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_name_round_trip() {
        let id = "0b6f3c2e-8d4b-4a55-9d8e-2f1c7a9b1e11";
        let name = process_name("freqtrade", id);
        assert_eq!(name, "freqtrade-0b6f3c2e-8d4b-4a55-9d8e-2f1c7a9b1e11");
        assert_eq!(instance_id_from_process_name("freqtrade", &name), Some(id));
    }

    #[test]
    fn test_foreign_process_names_are_ignored() {
        assert_eq!(instance_id_from_process_name("freqtrade", "nginx"), None);
        assert_eq!(instance_id_from_process_name("freqtrade", "freqtrade"), None);
        assert_eq!(instance_id_from_process_name("freqtrade", "freqtrade-"), None);
        assert_eq!(instance_id_from_process_name("freqtrade", "freqtradex-1"), None);
    }

    #[test]
    fn test_engine_bot_name() {
        assert_eq!(engine_bot_name("abc"), "ft_abc");
    }
}

use super::AppConfig;
use anyhow::Result;

pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.api_id <= 0 {
        anyhow::bail!("API_ID 必须为正整数");
    }

    if config.api_hash.is_empty() {
        anyhow::bail!("API_HASH 不能为空");
    }

    if config.source.is_empty() {
        anyhow::bail!("SOURCE_ENTITY 不能为空");
    }

    if config.destination.is_empty() {
        anyhow::bail!("DESTINATION_ENTITY 不能为空");
    }

    if config.delay_between_messages < 0.0 {
        anyhow::bail!("DELAY_BETWEEN_MESSAGES 不能为负数");
    }

    if config.start_from_message_id < 0 || config.end_at_message_id < 0 {
        anyhow::bail!("START_FROM_MESSAGE_ID / END_AT_MESSAGE_ID 不能为负数");
    }
    if config.start_from_message_id > 0
        && config.end_at_message_id > 0
        && config.start_from_message_id > config.end_at_message_id
    {
        anyhow::bail!(
            "START_FROM_MESSAGE_ID ({}) 不能大于 END_AT_MESSAGE_ID ({})",
            config.start_from_message_id,
            config.end_at_message_id
        );
    }

    if let (Some(start), Some(end)) = (config.start_date, config.end_date) {
        if start > end {
            anyhow::bail!("START_DATE ({}) 不能晚于 END_DATE ({})", start, end);
        }
    }

    if config.max_message_length > 0 && config.min_message_length > config.max_message_length {
        anyhow::bail!("MIN_MESSAGE_LENGTH 不能大于 MAX_MESSAGE_LENGTH");
    }

    if config.flood_wait_max_retries == 0 {
        anyhow::bail!("FLOOD_WAIT_MAX_RETRIES 必须大于 0");
    }
    if config.flood_wait_max_total_wait == 0 {
        anyhow::bail!("FLOOD_WAIT_MAX_TOTAL_WAIT 必须大于 0");
    }

    if config.download_dir.as_os_str().is_empty() {
        anyhow::bail!("DOWNLOAD_DIR 不能为空");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_config;
    use std::path::Path;

    fn base() -> AppConfig {
        build_config(Path::new("/srv"), |key| {
            match key {
                "API_ID" => Some("1"),
                "API_HASH" => Some("h"),
                "SOURCE_ENTITY" => Some("a"),
                "DESTINATION_ENTITY" => Some("b"),
                _ => None,
            }
            .map(str::to_string)
        })
        .unwrap()
    }

    #[test]
    fn accepts_defaults() {
        assert!(validate_config(&base()).is_ok());
    }

    #[test]
    fn rejects_inverted_id_range() {
        let mut config = base();
        config.start_from_message_id = 50;
        config.end_at_message_id = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_inverted_dates() {
        let mut config = base();
        config.start_date = chrono::NaiveDate::from_ymd_opt(2024, 5, 2);
        config.end_date = chrono::NaiveDate::from_ymd_opt(2024, 5, 1);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_retry_budget() {
        let mut config = base();
        config.flood_wait_max_retries = 0;
        assert!(validate_config(&config).is_err());
    }
}

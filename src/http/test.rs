#[cfg(test)]
mod tests {
    use crate::http::RateLimitedHttpClient;
    use std::time::Instant;

    #[tokio::test]
    async fn test_rate_limiter_basic_functionality() {
        let client = RateLimitedHttpClient::new("test_token".to_string(), 1, 10).unwrap();

        client.clear_cache().await;
        client.invalidate_cache_pattern("test").await;

        println!("Rate limiting client created successfully");
    }

    #[tokio::test]
    async fn test_rate_limiting_timing() {
        let client = RateLimitedHttpClient::new("test_token".to_string(), 1, 10).unwrap();

        let start = Instant::now();

        for i in 0..3 {
            let _result = client
                .execute_with_rate_limit::<_, String>(Some(format!("test_key_{i}")), || {
                    Box::pin(async {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Ok("success".to_string())
                    })
                })
                .await;
        }

        let elapsed = start.elapsed();
        println!("Three rate-limited requests took: {elapsed:?}");
        assert!(elapsed.as_millis() >= 10);
    }
}

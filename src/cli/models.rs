use runbit_llm::models::MODELS;

pub fn run() {
    println!(
        "{:<20} {:<18} {:<10} {:>10} {:>10} {:>8} {:>6} {:>9}",
        "MODEL", "KEY", "PROVIDER", "$/1K IN", "$/1K OUT", "MAX OUT", "RPM", "TPM"
    );
    for spec in MODELS {
        println!(
            "{:<20} {:<18} {:<10} {:>10.6} {:>10.6} {:>8} {:>6} {:>9}",
            spec.prefix,
            spec.short_code,
            spec.provider.as_str(),
            spec.prompt_rate,
            spec.completion_rate,
            spec.max_output_tokens,
            spec.limit_requests,
            spec.limit_tokens
        );
    }
}

pub fn print_help() {
    println!("convoy {}", env!("CARGO_PKG_VERSION"));
    println!("Syncs coding-assistant session transcripts into an issue tracker.\n");
    print_usage();
    print_environment();
}

fn print_usage() {
    println!("USAGE:");
    println!("  convoy                          Run the queue processor (default)");
    println!("  convoy run                       Run the queue processor");
    println!("  convoy hook session-stop         Process a SessionStop hook event from stdin");
    println!("  convoy hook post-tool-use        Process a PostToolUse hook event from stdin");
    println!("  convoy help | --help | -h        Show this message");
    println!("  convoy --version | -V            Show version\n");
}

fn print_environment() {
    println!("ENVIRONMENT:");
    println!("  CONVOY_DATA_HOME               Base directory for queue + config (default: ~/.convoy)");
    println!("  CONVOY_QUEUE_PATH               Queue file path (default: <data_home>/queue.jsonl)");
    println!("  CONVOY_BRANCH_PATTERN           Regex for branch-name issue identifiers (default: ([A-Z]+-\\d+))");
    println!("  CONVOY_MAX_RETRIES              Max retry attempts for failed records (default: 3)");
    println!("  CONVOY_LLM_COMMAND              External LLM CLI command (default: llm)");
    println!("  CONVOY_LLM_TIMEOUT_SECS         LLM invocation timeout in seconds (default: 60)");
    println!("  CONVOY_TRACKER_TOKEN            Bearer token for the tracker's GraphQL API");
    println!("  CONVOY_TRACKER_ENDPOINT         Tracker GraphQL endpoint URL");
    println!("  CONVOY_SHELL_TOOL               Shell-execution tool name (default: Bash)");
    println!("  CONVOY_KEYWORD_WEIGHT, CONVOY_SEMANTIC_WEIGHT, CONVOY_CONFIDENCE_THRESHOLD,");
    println!("  CONVOY_MAX_CANDIDATES, CONVOY_ENABLE_SEMANTIC, CONVOY_MAX_API_CALLS_PER_MINUTE");
    println!("                                  Matcher tuning knobs (built-in defaults otherwise)");
}

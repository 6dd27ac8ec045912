mod dedup_failover;
mod watch_lifecycle;

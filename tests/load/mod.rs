mod concurrent_servers;

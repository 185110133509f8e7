mod definitions;
mod end_to_end;
mod sync_client;

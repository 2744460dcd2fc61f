mod certification;
mod commit;

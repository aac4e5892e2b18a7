pub mod helpers;

mod tests_isolation;

mod tests_lifecycle;

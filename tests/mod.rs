
// This file organizes the integration tests into a cohesive test suite.
// Each module tests a specific aspect of the application:
// - api_tests: accounts, sessions and event CRUD over HTTP
// - smoke_tests: config and store start-up
// - view_tests: daily, weekly and monthly calendar views

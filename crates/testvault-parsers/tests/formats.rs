use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use testvault_core::{ArchiveConfig, Tracker};
use testvault_parsers::{ParseError, ReportFormat, archive_report, archive_str};
use testvault_store::schema::{
    KEYWORD_TREE, LOG_MESSAGE, SUITE, SUITE_METADATA, SUITE_RESULT, TEST_CASE, TEST_RESULT,
    TEST_RUN, TEST_TAG,
};
use testvault_store::{MemoryArchiveStore, Record, RowId, SqlValue};

fn tracker(store: &MemoryArchiveStore) -> Tracker {
    Tracker::new(Arc::new(store.clone()), ArchiveConfig::default())
}

fn archive(store: &MemoryArchiveStore, format: ReportFormat, document: &str) {
    archive_str(document, format, &mut tracker(store)).expect("archive report");
}

fn text<'a>(record: &'a Record, column: &str) -> Option<&'a str> {
    record.get(column).and_then(SqlValue::as_str)
}

fn integer(record: &Record, column: &str) -> Option<i64> {
    record.get(column).and_then(SqlValue::as_i64)
}

fn full_names(store: &MemoryArchiveStore, table: &str) -> BTreeMap<RowId, String> {
    store
        .rows(table)
        .expect("rows")
        .into_iter()
        .filter_map(|row| text(&row.record, "full_name").map(|name| (row.id, name.to_string())))
        .collect()
}

/// Result rows keyed by the full name of the test or suite they belong to.
fn results(
    store: &MemoryArchiveStore,
    table: &str,
    names_table: &str,
    id_column: &str,
) -> BTreeMap<String, Record> {
    let names = full_names(store, names_table);
    store
        .rows(table)
        .expect("results")
        .into_iter()
        .filter_map(|row| {
            let id = integer(&row.record, id_column)?;
            Some((names.get(&id)?.clone(), row.record))
        })
        .collect()
}

fn test_results(store: &MemoryArchiveStore) -> BTreeMap<String, Record> {
    results(store, TEST_RESULT, TEST_CASE, "test_id")
}

fn suite_results(store: &MemoryArchiveStore) -> BTreeMap<String, Record> {
    results(store, SUITE_RESULT, SUITE, "suite_id")
}

fn statuses(results: &BTreeMap<String, Record>) -> Vec<(&str, &str)> {
    results
        .iter()
        .map(|(name, record)| (name.as_str(), text(record, "status").unwrap_or("-")))
        .collect()
}

fn log_messages(store: &MemoryArchiveStore) -> Vec<(String, String)> {
    store
        .rows(LOG_MESSAGE)
        .expect("logs")
        .into_iter()
        .map(|row| {
            (
                text(&row.record, "log_level").unwrap_or_default().to_string(),
                text(&row.record, "message").unwrap_or_default().to_string(),
            )
        })
        .collect()
}

fn keyword_names(store: &MemoryArchiveStore) -> Vec<(String, String)> {
    store
        .rows(KEYWORD_TREE)
        .expect("keywords")
        .into_iter()
        .filter_map(|row| {
            Some((
                text(&row.record, "library")?.to_string(),
                text(&row.record, "keyword")?.to_string(),
            ))
        })
        .collect()
}

const ROBOT_CLASSIC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<robot generator="Robot 3.2.2 (Python 3.8.5 on linux)" generated="20210101 10:00:00.000" rpa="false">
<suite id="s1" name="Root" source="/tmp/root">
<test id="s1-t1" name="Passing">
<kw name="Log" library="BuiltIn">
<arguments>
<arg>hello</arg>
</arguments>
<msg timestamp="20210101 10:00:00.100" level="INFO">hello</msg>
<status status="PASS" starttime="20210101 10:00:00.050" endtime="20210101 10:00:00.150"/>
</kw>
<tags>
<tag>smoke</tag>
</tags>
<status status="PASS" starttime="20210101 10:00:00.000" endtime="20210101 10:00:01.000" critical="yes"/>
</test>
<test id="s1-t2" name="Failing">
<kw name="Fail" library="BuiltIn">
<arguments>
<arg>boom</arg>
</arguments>
<msg timestamp="20210101 10:00:01.100" level="FAIL">boom</msg>
<status status="FAIL" starttime="20210101 10:00:01.000" endtime="20210101 10:00:01.200"/>
</kw>
<status status="FAIL" starttime="20210101 10:00:01.000" endtime="20210101 10:00:01.300" critical="yes">boom</status>
</test>
<metadata>
<item name="Version">1.2</item>
</metadata>
<status status="FAIL" starttime="20210101 10:00:00.000" endtime="20210101 10:00:02.000"/>
</suite>
<statistics>
<total>
<stat pass="1" fail="1">All Tests</stat>
</total>
</statistics>
<errors>
<msg timestamp="20210101 10:00:00.000" level="WARN">ignored</msg>
</errors>
</robot>
"#;

#[test]
fn robot_classic_output_expected_results_logs_tags_and_metadata() {
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::Robot, ROBOT_CLASSIC);

    let tests = test_results(&store);
    assert_eq!(
        statuses(&tests),
        vec![("Root.Failing", "FAIL"), ("Root.Passing", "PASS")]
    );
    assert_eq!(integer(&tests["Root.Passing"], "elapsed"), Some(1000));
    assert_eq!(text(&tests["Root.Passing"], "execution_path"), Some("s1-t1"));
    assert_eq!(statuses(&suite_results(&store)), vec![("Root", "FAIL")]);

    assert_eq!(
        log_messages(&store),
        vec![
            ("INFO".to_string(), "hello".to_string()),
            ("FAIL".to_string(), "boom".to_string()),
        ]
    );
    let tags = store.rows(TEST_TAG).expect("tags");
    assert_eq!(tags.len(), 1);
    assert_eq!(text(&tags[0].record, "tag"), Some("smoke"));
    let metadata = store.rows(SUITE_METADATA).expect("metadata");
    assert_eq!(text(&metadata[0].record, "name"), Some("Version"));
    assert_eq!(text(&metadata[0].record, "value"), Some("1.2"));

    let run = &store.rows(TEST_RUN).expect("runs")[0].record;
    assert_eq!(text(run, "archived_using"), Some("RF parser"));
    assert_eq!(
        text(run, "generator"),
        Some("Robot 3.2.2 (Python 3.8.5 on linux)")
    );
}

#[test]
fn robot_7_control_structures_expected_archived_as_keywords() {
    let document = r#"<?xml version="1.0" encoding="UTF-8"?>
<robot generator="Robot 7.0 (Python 3.11.4 on linux)" generated="2024-01-05T10:00:00.000000" rpa="false" schemaversion="5">
<suite id="s1" name="Root">
<test id="s1-t1" name="Loop">
<for flavor="IN">
<iter>
<var name="${i}">1</var>
<kw name="Log" owner="BuiltIn">
<arg>${i}</arg>
<msg time="2024-01-05T10:00:00.100000" level="INFO">1</msg>
<status status="PASS" start="2024-01-05T10:00:00.050000" elapsed="0.010"/>
</kw>
<status status="PASS" start="2024-01-05T10:00:00.040000" elapsed="0.020"/>
</iter>
<var>${i}</var>
<value>1</value>
<status status="PASS" start="2024-01-05T10:00:00.030000" elapsed="0.030"/>
</for>
<status status="PASS" start="2024-01-05T10:00:00.000000" elapsed="0.500"/>
</test>
<status status="PASS" start="2024-01-05T10:00:00.000000" elapsed="1.000"/>
</suite>
</robot>
"#;
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::Robot, document);

    let tests = test_results(&store);
    assert_eq!(statuses(&tests), vec![("Root.Loop", "PASS")]);
    assert_eq!(integer(&tests["Root.Loop"], "elapsed"), Some(500));

    let keywords = keyword_names(&store);
    assert!(keywords.contains(&("FOR".to_string(), "IN".to_string())));
    assert!(keywords.contains(&("ITER".to_string(), "iter".to_string())));
    assert!(keywords.contains(&("BuiltIn".to_string(), "Log".to_string())));
}

#[test]
fn junit_report_expected_class_names_statuses_and_logs() {
    let document = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites>
<testsuite name="com.example.CalcTest" tests="3" failures="1" errors="0" skipped="1" timestamp="2024-01-05T10:00:00" time="1.5">
<properties>
<property name="java.version" value="17"/>
</properties>
<testcase name="adds" classname="com.example.CalcTest" time="0.5"/>
<testcase name="divides" classname="com.example.CalcTest" time="0.25">
<failure message="expected 2" type="AssertionError">stack trace here</failure>
</testcase>
<testcase name="later" classname="com.example.CalcTest" time="0">
<skipped/>
</testcase>
<system-out>hello out</system-out>
</testsuite>
</testsuites>
"#;
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::JUnit, document);

    let tests = test_results(&store);
    assert_eq!(
        statuses(&tests),
        vec![
            ("com.example.CalcTest.adds", "PASS"),
            ("com.example.CalcTest.divides", "FAIL"),
            ("com.example.CalcTest.later", "SKIPPED"),
        ]
    );
    assert_eq!(integer(&tests["com.example.CalcTest.adds"], "elapsed"), Some(500));

    assert_eq!(
        log_messages(&store),
        vec![
            ("FAIL".to_string(), "expected 2".to_string()),
            ("FAIL".to_string(), "stack trace here".to_string()),
            ("INFO".to_string(), "hello out".to_string()),
        ]
    );
    let metadata = store.rows(SUITE_METADATA).expect("metadata");
    assert_eq!(metadata.len(), 1);
    assert_eq!(text(&metadata[0].record, "value"), Some("17"));

    let run = &store.rows(TEST_RUN).expect("runs")[0].record;
    assert_eq!(text(run, "archived_using"), Some("JUnit parser"));
}

#[test]
fn mocha_report_expected_dotted_suites_nested_and_hook_failure_attached() {
    let document = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites name="Mocha Tests" time="0.1" tests="3" failures="2">
<testsuite name="Root Suite" timestamp="2024-01-05T10:00:00" tests="0" time="0" failures="0">
</testsuite>
<testsuite name="Calculator" timestamp="2024-01-05T10:00:00" tests="2" time="0.01" failures="1">
<testcase name="Calculator adds" time="0.001" classname="adds">
</testcase>
<testcase name="Calculator divides" time="0.002" classname="divides">
<failure message="expected 1 to equal 2" type="AssertionError"><![CDATA[AssertionError: expected 1 to equal 2
    at Context.<anonymous> (test/calc.js:10:5)]]></failure>
</testcase>
</testsuite>
<testsuite name="Calculator.Nested" timestamp="2024-01-05T10:00:00" tests="1" time="0" failures="1">
<testcase name="&quot;before each&quot; hook for &quot;works&quot;" time="0" classname="&quot;before each&quot; hook for &quot;works&quot;">
<failure message="setup broke" type="Error">Error: setup broke</failure>
</testcase>
</testsuite>
</testsuites>
"#;
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::MochaJUnit, document);

    assert_eq!(
        statuses(&suite_results(&store)),
        vec![
            ("Calculator", "FAIL"),
            ("Calculator.Nested", "FAIL"),
            ("Root Suite", "PASS"),
        ]
    );
    let tests = test_results(&store);
    assert_eq!(
        statuses(&tests),
        vec![
            ("Calculator.Calculator adds", "PASS"),
            ("Calculator.Calculator divides", "FAIL"),
            ("Calculator.Nested.works", "FAIL"),
        ]
    );
    assert_eq!(
        text(&tests["Calculator.Nested.works"], "setup_status"),
        Some("FAIL")
    );

    let run = &store.rows(TEST_RUN).expect("runs")[0].record;
    assert_eq!(text(run, "generator"), Some("Mocha Tests"));
}

#[test]
fn mocha_after_each_hook_expected_attached_to_the_hooked_test() {
    let document = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites name="Mocha Tests" time="0.1" tests="2" failures="2">
<testsuite name="Cleanup" timestamp="2024-01-05T10:00:00" tests="2" time="0.01" failures="2">
<testcase name="Cleanup resets" time="0.001" classname="resets">
</testcase>
<testcase name="&quot;after each&quot; hook for &quot;resets&quot;" time="0" classname="&quot;after each&quot; hook for &quot;resets&quot;">
<failure message="reset broke" type="Error">Error: reset broke</failure>
</testcase>
<testcase name="&quot;after each&quot; hook for &quot;unreported&quot;" time="0" classname="&quot;after each&quot; hook for &quot;unreported&quot;">
<failure message="cleanup broke" type="Error">Error: cleanup broke</failure>
</testcase>
</testsuite>
</testsuites>
"#;
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::MochaJUnit, document);

    let tests = test_results(&store);
    assert_eq!(
        statuses(&tests),
        vec![("Cleanup.Cleanup resets", "FAIL"), ("Cleanup.unreported", "FAIL")]
    );
    assert_eq!(
        text(&tests["Cleanup.Cleanup resets"], "teardown_status"),
        Some("FAIL")
    );
    assert_eq!(
        text(&tests["Cleanup.unreported"], "teardown_status"),
        Some("FAIL")
    );
}

#[test]
fn pytest_report_expected_suites_rebuilt_from_class_names() {
    let document = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuites><testsuite name="pytest" errors="0" failures="1" skipped="0" tests="3" time="0.5" timestamp="2024-01-05T10:00:00.000000" hostname="ci">
<testcase classname="tests.test_math.TestMath" name="test_add" time="0.001"/>
<testcase classname="tests.test_math.TestMath" name="test_div" time="0.002"><failure message="ZeroDivisionError: division by zero">def test_div(self):
&gt;       1 / 0
E       ZeroDivisionError: division by zero</failure></testcase>
<testcase classname="tests.test_io" name="test_read" time="0.003"/>
</testsuite></testsuites>
"#;
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::PytestJUnit, document);

    assert_eq!(
        statuses(&test_results(&store)),
        vec![
            ("pytest.tests.test_io.test_read", "PASS"),
            ("pytest.tests.test_math.TestMath.test_add", "PASS"),
            ("pytest.tests.test_math.TestMath.test_div", "FAIL"),
        ]
    );
    let suites: Vec<String> = suite_results(&store).into_keys().collect();
    assert_eq!(
        suites,
        vec![
            "pytest",
            "pytest.tests",
            "pytest.tests.test_io",
            "pytest.tests.test_math",
            "pytest.tests.test_math.TestMath",
        ]
    );
    assert!(
        keyword_names(&store).contains(&("python".to_string(), "ZeroDivisionError".to_string()))
    );
}

#[test]
fn pytest_teardown_failure_expected_teardown_keyword_on_test() {
    let document = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuites><testsuite name="pytest" errors="1" failures="0" skipped="0" tests="1" time="0.1">
<testcase classname="tests.test_db.TestDb" name="test_query" time="0.01"/>
<testcase classname="tests.test_db.TestDb" name="test_query" time="0.002"><error message="test teardown failure">self = &lt;tests.test_db.TestDb testMethod=test_query&gt;

    def tearDown(self):
&gt;       raise RuntimeError("cleanup")
E       RuntimeError: cleanup</error></testcase>
</testsuite></testsuites>
"#;
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::PytestJUnit, document);

    let tests = test_results(&store);
    let result = &tests["pytest.tests.test_db.TestDb.test_query"];
    assert_eq!(tests.len(), 1);
    assert_eq!(text(result, "status"), Some("FAIL"));
    assert_eq!(text(result, "teardown_status"), Some("FAIL"));
}

#[test]
fn phpunit_report_expected_file_suites_and_class_teardown_on_suite() {
    let document = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites>
<testsuite name="Unit" tests="4" assertions="4" errors="0" failures="2" skipped="0" time="0.04">
<testsuite name="Tests\CalculatorTest" file="/app/tests/CalculatorTest.php" tests="2" assertions="2" errors="0" failures="1" skipped="0" time="0.02">
<testcase name="testAdd" class="Tests\CalculatorTest" classname="Tests.CalculatorTest" file="/app/tests/CalculatorTest.php" line="8" assertions="1" time="0.01"/>
<testcase name="testDivide" class="Tests\CalculatorTest" classname="Tests.CalculatorTest" file="/app/tests/CalculatorTest.php" line="14" assertions="1" time="0.01">
<failure type="PHPUnit\Framework\ExpectationFailedException">Tests\CalculatorTest::testDivide
Failed asserting that 1 matches expected 2.</failure>
</testcase>
</testsuite>
<testsuite name="Tests\DbTest" file="/app/tests/DbTest.php" tests="2" assertions="2" errors="0" failures="1" skipped="0" time="0.02">
<testcase name="testFirst" classname="Tests.DbTest" time="0.01"/>
<testcase name="testLast" classname="Tests.DbTest" time="0.01">
<failure type="Exception">Exception: connection left open in tearDownAfterClass</failure>
</testcase>
</testsuite>
</testsuite>
</testsuites>
"#;
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::PhpJUnit, document);

    assert_eq!(
        statuses(&test_results(&store)),
        vec![
            ("Tests.CalculatorTest.testAdd", "PASS"),
            ("Tests.CalculatorTest.testDivide", "FAIL"),
            ("Tests.DbTest.testFirst", "FAIL"),
            ("Tests.DbTest.testLast", "FAIL"),
        ]
    );
    let suites = suite_results(&store);
    assert!(suites.contains_key("phpunit"));
    assert!(suites.contains_key("phpunit.Unit"));
    assert_eq!(
        text(&suites["phpunit.Unit.Tests\\DbTest"], "teardown_status"),
        Some("FAIL")
    );
    assert!(keyword_names(&store).contains(&(
        "phpunit".to_string(),
        "PHPUnit\\Framework\\ExpectationFailedException".to_string()
    )));
}

#[test]
fn mstest_report_expected_root_suite_outcomes_and_output_logs() {
    let document = r#"<?xml version="1.0" encoding="UTF-8"?>
<TestRun id="5b1a" name="ci@BUILD 2024-01-05 10:00:00" runUser="ci" xmlns="http://microsoft.com/schemas/VisualStudio/TeamTest/2010">
<Times creation="2024-01-05T10:00:00.0000000+00:00" queuing="2024-01-05T10:00:00.0000000+00:00" start="2024-01-05T10:00:00.1234567+00:00" finish="2024-01-05T10:00:05.1234567+00:00"/>
<TestSettings name="default" id="6c2b">
<Deployment runDeploymentRoot="root"/>
</TestSettings>
<Results>
<UnitTestResult executionId="e1" testId="t1" testName="AddsNumbers" computerName="BUILD" duration="00:00:00.0100000" startTime="2024-01-05T10:00:01.0000000+00:00" endTime="2024-01-05T10:00:01.0100000+00:00" outcome="Passed">
<Output>
<StdOut>calculating</StdOut>
</Output>
</UnitTestResult>
<UnitTestResult executionId="e2" testId="t2" testName="DividesNumbers" computerName="BUILD" startTime="2024-01-05T10:00:02.0000000+00:00" endTime="2024-01-05T10:00:02.5000000+00:00" outcome="Failed">
<Output>
<ErrorInfo>
<Message>Assert.AreEqual failed.</Message>
<StackTrace>at Tests.Calc.Divides()</StackTrace>
</ErrorInfo>
</Output>
</UnitTestResult>
<UnitTestResult executionId="e3" testId="t3" testName="Ignored" computerName="BUILD" startTime="2024-01-05T10:00:03.0000000+00:00" endTime="2024-01-05T10:00:03.0000000+00:00" outcome="NotExecuted"/>
</Results>
<TestDefinitions>
<UnitTest name="AddsNumbers" id="t1"/>
</TestDefinitions>
<ResultSummary outcome="Failed">
<Counters total="3" executed="2" passed="1" failed="1"/>
</ResultSummary>
</TestRun>
"#;
    let store = MemoryArchiveStore::new();
    archive(&store, ReportFormat::MsTest, document);

    let tests = test_results(&store);
    assert_eq!(
        statuses(&tests),
        vec![
            ("Root suite.AddsNumbers", "PASS"),
            ("Root suite.DividesNumbers", "FAIL"),
            ("Root suite.Ignored", "SKIPPED"),
        ]
    );
    assert_eq!(integer(&tests["Root suite.DividesNumbers"], "elapsed"), Some(500));
    assert_eq!(integer(&suite_results(&store)["Root suite"], "elapsed"), Some(5000));
    assert_eq!(
        log_messages(&store),
        vec![
            ("INFO".to_string(), "calculating".to_string()),
            ("ERROR".to_string(), "Assert.AreEqual failed.".to_string()),
            ("ERROR".to_string(), "at Tests.Calc.Divides()".to_string()),
        ]
    );
}

#[test]
fn archive_report_missing_file_expected_missing_file_error() {
    let store = MemoryArchiveStore::new();
    let error = archive_report(
        std::path::Path::new("/nonexistent/output.xml"),
        ReportFormat::Robot,
        &mut tracker(&store),
    )
    .expect_err("missing file");

    assert!(matches!(error, ParseError::MissingFile(_)));
    assert_eq!(store.row_count(TEST_RUN).expect("runs"), 0);
}

#[test]
fn archive_report_from_file_expected_run_committed() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(
        br#"<testsuite name="Smoke" tests="1"><testcase name="boots" classname="app" time="0.1"/></testsuite>"#,
    )
    .expect("write report");
    let store = MemoryArchiveStore::new();

    archive_report(file.path(), ReportFormat::XUnit, &mut tracker(&store)).expect("archive");

    assert_eq!(statuses(&test_results(&store)), vec![("app.boots", "PASS")]);
    let run = &store.rows(TEST_RUN).expect("runs")[0].record;
    assert_eq!(text(run, "archived_using"), Some("xUnit parser"));
}

#[test]
fn malformed_report_expected_xml_error_and_nothing_committed() {
    let store = MemoryArchiveStore::new();
    let mut tracker = tracker(&store);

    let error = archive_str(
        r#"<testsuite name="Broken"><testcase name="x" classname="a"></testsuite>"#,
        ReportFormat::JUnit,
        &mut tracker,
    )
    .expect_err("mismatched tags");

    assert!(matches!(error, ParseError::Xml { .. }));
    assert!(!tracker.has_run());
    assert_eq!(store.row_count(TEST_RUN).expect("runs"), 0);
    assert_eq!(store.row_count(TEST_CASE).expect("cases"), 0);
}
